//! Transaction coordinator
//!
//! Drives begin/commit/rollback/suspend/resume for one session factory.
//!
//! # Flow
//!
//! ```text
//! get_transaction(def)
//!   ├─ holder bound with an active transaction ─► dispatch on propagation
//!   │     REQUIRED/SUPPORTS/MANDATORY ─► participate (reference count + 1)
//!   │     REQUIRES_NEW ─► suspend, begin new
//!   │     NOT_SUPPORTED ─► suspend, run without
//!   │     NESTED ─► savepoint, or participate when unsupported
//!   │     NEVER ─► IllegalTransactionState
//!   └─ nothing active
//!         REQUIRED/REQUIRES_NEW/NESTED ─► begin new
//!         SUPPORTS/NOT_SUPPORTED/NEVER ─► run without
//!         MANDATORY ─► IllegalTransactionState
//! ```
//!
//! Only the status that began the native transaction completes it. A
//! participant's rollback marks the holder rollback-only; the owner's commit
//! then rolls back and reports [`Error::UnexpectedRollback`].
//!
//! # Cleanup
//!
//! Every completion path, successful or not, ends in the same cleanup:
//! synchronization is cleared if this status activated it, a holder bound by
//! this status is unbound, a session opened by this status is closed once its
//! reference count is zero, and suspended resources are resumed.

use crate::config::CoordinatorConfig;
use crate::metrics::{MetricsRecorder, TransactionMetrics};
use crate::session_utils::close_session;
use crate::status::{SuspendedHolder, SuspendedResources, TransactionStatus};
use sessionbind_concurrency::{
    synchronization, ResourceHolder, ResourceRegistry, SynchronizationRef,
};
use sessionbind_core::{
    translate_error, CompletionStatus, DataAccessError, DataAccessKind, Error, Propagation,
    Result, SessionFactory, StoreErrorKind, TransactionDefinition,
};
use std::sync::Arc;
use tracing::{debug, error, trace, warn, Level};

/// What the registry offered for a new request
struct TransactionObject {
    holder: Option<Arc<ResourceHolder>>,
    new_holder: bool,
    new_session: bool,
}

impl TransactionObject {
    fn empty() -> Self {
        Self {
            holder: None,
            new_holder: false,
            new_session: false,
        }
    }

    fn bound(holder: Arc<ResourceHolder>) -> Self {
        Self {
            holder: Some(holder),
            new_holder: false,
            new_session: false,
        }
    }
}

/// Transaction state machine for one session factory
pub struct TransactionCoordinator {
    factory: Arc<dyn SessionFactory>,
    config: CoordinatorConfig,
    metrics: MetricsRecorder,
}

impl TransactionCoordinator {
    /// Coordinator with default configuration
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_config(factory, CoordinatorConfig::default())
    }

    /// Coordinator with explicit configuration
    pub fn with_config(factory: Arc<dyn SessionFactory>, config: CoordinatorConfig) -> Self {
        Self {
            factory,
            config,
            metrics: MetricsRecorder::default(),
        }
    }

    /// The managed factory
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// Active configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Snapshot of the transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.metrics.snapshot()
    }

    // ========================================================================
    // Begin
    // ========================================================================

    /// Begin, join or step around a transaction according to `definition`
    pub fn get_transaction(&self, definition: &TransactionDefinition) -> Result<TransactionStatus> {
        let definition = self.effective_definition(definition);
        let debug = tracing::enabled!(Level::DEBUG);
        let registry = ResourceRegistry::current();
        let transaction = self.do_get_transaction(&registry)?;

        if self.is_existing_transaction(&transaction) {
            return self.handle_existing_transaction(&definition, transaction, registry, debug);
        }

        match definition.propagation {
            Propagation::Mandatory => Err(Error::IllegalTransactionState(
                "No existing transaction found for transaction marked with propagation 'mandatory'"
                    .into(),
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                let suspended = self.suspend(&registry, None)?;
                debug!(
                    name = ?definition.name,
                    propagation = %definition.propagation,
                    "creating new transaction"
                );
                self.start_transaction(&definition, transaction, registry, debug, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                trace!(propagation = %definition.propagation, "running without transaction");
                let mut status = TransactionStatus::new(registry, definition.read_only, debug);
                status.name = definition.name.clone();
                Ok(status)
            }
        }
    }

    fn effective_definition(&self, definition: &TransactionDefinition) -> TransactionDefinition {
        let mut definition = definition.clone();
        if definition.timeout.is_none() {
            definition.timeout = self.config.default_timeout();
        }
        definition
    }

    fn do_get_transaction(&self, registry: &ResourceRegistry) -> Result<TransactionObject> {
        let key = self.factory.key();
        if let Some(holder) = registry.lookup(key) {
            debug!(
                factory = %key,
                session = ?holder.session_id(),
                "found thread-bound session for transaction"
            );
            return Ok(TransactionObject::bound(holder));
        }
        if self.config.factory_managed_sessions {
            let session = self.factory.current_session().map_err(|e| {
                warn!(error = %e, "could not obtain factory-managed session for transaction");
                match e {
                    Error::Store(source) => Error::DataAccess(DataAccessError::new(
                        DataAccessKind::ResourceFailure,
                        source,
                    )),
                    other => other,
                }
            })?;
            debug!(session = ?session.id().ok(), "found factory-managed session for transaction");
            return Ok(TransactionObject {
                holder: Some(Arc::new(ResourceHolder::new(session))),
                new_holder: true,
                new_session: false,
            });
        }
        Ok(TransactionObject::empty())
    }

    fn is_existing_transaction(&self, transaction: &TransactionObject) -> bool {
        let Some(holder) = &transaction.holder else {
            return false;
        };
        if holder.has_active_transaction() {
            return true;
        }
        self.config.factory_managed_sessions
            && matches!(
                holder.session().transaction(),
                Ok(Some(tx)) if tx.state().is_active()
            )
    }

    fn handle_existing_transaction(
        &self,
        definition: &TransactionDefinition,
        transaction: TransactionObject,
        registry: Arc<ResourceRegistry>,
        debug: bool,
    ) -> Result<TransactionStatus> {
        let Some(holder) = transaction.holder else {
            return Err(Error::IllegalState(
                "existing transaction without a session holder".into(),
            ));
        };

        match definition.propagation {
            Propagation::Never => Err(Error::IllegalTransactionState(
                "Existing transaction found for transaction marked with propagation 'never'"
                    .into(),
            )),
            Propagation::NotSupported => {
                debug!("suspending current transaction");
                let suspended = self.suspend(&registry, Some(&holder))?;
                let mut status = TransactionStatus::new(registry, definition.read_only, debug);
                status.name = definition.name.clone();
                status.suspended = suspended;
                Ok(status)
            }
            Propagation::RequiresNew => {
                debug!(name = ?definition.name, "suspending current transaction, creating new transaction");
                let suspended = self.suspend(&registry, Some(&holder))?;
                self.start_transaction(
                    definition,
                    TransactionObject::empty(),
                    registry,
                    debug,
                    suspended,
                )
            }
            Propagation::Nested => {
                if !self.config.nested_transactions_allowed {
                    return Err(Error::UnsupportedPropagation(
                        "Transaction manager does not allow nested transactions - enable 'nested_transactions_allowed'"
                            .into(),
                    ));
                }
                let native = holder
                    .transaction()
                    .or_else(|| holder.session().transaction().ok().flatten());
                match native.filter(|tx| tx.supports_savepoints()) {
                    Some(tx) => {
                        let savepoint = tx.create_savepoint().map_err(|e| {
                            Error::CannotCreateTransaction {
                                message: "could not create savepoint for nested transaction".into(),
                                source: Box::new(e),
                            }
                        })?;
                        debug!(savepoint = savepoint.0, "creating nested transaction with savepoint");
                        holder.push_savepoint(savepoint);
                        let mut status = self.participate(holder, registry, definition, debug)?;
                        status.savepoint = Some(savepoint);
                        Ok(status)
                    }
                    None => {
                        warn!("backing store has no savepoints, nested transaction joins the existing one");
                        self.participate(holder, registry, definition, debug)
                    }
                }
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                debug!(session = ?holder.session_id(), "participating in existing transaction");
                self.participate(holder, registry, definition, debug)
            }
        }
    }

    fn participate(
        &self,
        holder: Arc<ResourceHolder>,
        registry: Arc<ResourceRegistry>,
        definition: &TransactionDefinition,
        debug: bool,
    ) -> Result<TransactionStatus> {
        holder.requested();
        self.metrics.participating();
        let mut status = TransactionStatus::new(registry, definition.read_only, debug);
        status.holder = Some(holder);
        status.name = definition.name.clone();
        status.new_synchronization = !synchronization::is_synchronization_active();
        self.prepare_synchronization(&status)?;
        Ok(status)
    }

    fn start_transaction(
        &self,
        definition: &TransactionDefinition,
        mut transaction: TransactionObject,
        registry: Arc<ResourceRegistry>,
        debug: bool,
        suspended: Option<SuspendedResources>,
    ) -> Result<TransactionStatus> {
        if let Err(e) = self.do_begin(&registry, &mut transaction, definition) {
            if let Err(resume_error) = self.resume(&registry, suspended) {
                error!(error = %resume_error, "could not resume outer transaction after failed begin");
            }
            return Err(e);
        }
        self.metrics.begun();

        let mut status = TransactionStatus::new(registry, definition.read_only, debug);
        status.holder = transaction.holder;
        status.new_holder = transaction.new_holder;
        status.new_session = transaction.new_session;
        status.new_transaction = true;
        status.new_synchronization = !synchronization::is_synchronization_active();
        status.name = definition.name.clone();
        status.suspended = suspended;
        self.prepare_synchronization(&status)?;
        Ok(status)
    }

    fn do_begin(
        &self,
        registry: &ResourceRegistry,
        transaction: &mut TransactionObject,
        definition: &TransactionDefinition,
    ) -> Result<()> {
        let holder = match transaction.holder.clone() {
            Some(holder) if !holder.is_synchronized_with_transaction() => holder,
            _ => {
                let session = self.factory.open_session().map_err(|e| {
                    Error::CannotCreateTransaction {
                        message: "could not open session for transaction".into(),
                        source: Box::new(e),
                    }
                })?;
                debug!(session = ?session.id().ok(), "opened new session for transaction");
                let holder = Arc::new(ResourceHolder::new(session));
                transaction.holder = Some(holder.clone());
                transaction.new_holder = true;
                transaction.new_session = true;
                holder
            }
        };

        if let Err(e) = self.begin_on_holder(registry, &holder, transaction.new_holder, definition)
        {
            if transaction.new_session {
                if let Ok(Some(tx)) = holder.session().transaction() {
                    if tx.state().is_active() {
                        if let Err(rollback_error) = tx.rollback() {
                            debug!(error = %rollback_error, "could not roll back session after failed transaction begin");
                        }
                    }
                }
                close_session(self.factory.as_ref(), holder.session().as_ref());
                transaction.holder = None;
            }
            return Err(Error::CannotCreateTransaction {
                message: "could not begin transaction on session".into(),
                source: Box::new(e),
            });
        }
        Ok(())
    }

    fn begin_on_holder(
        &self,
        registry: &ResourceRegistry,
        holder: &Arc<ResourceHolder>,
        bind: bool,
        definition: &TransactionDefinition,
    ) -> Result<()> {
        let native = holder.session().begin_transaction(definition)?;
        holder.set_transaction(native);
        if bind {
            registry.bind(self.factory.key(), holder.clone())?;
        }
        holder.set_synchronized_with_transaction(true);
        holder.requested();
        Ok(())
    }

    fn prepare_synchronization(&self, status: &TransactionStatus) -> Result<()> {
        if status.new_synchronization {
            synchronization::set_actual_transaction_active(status.has_transaction());
            synchronization::set_current_transaction_read_only(status.read_only);
            synchronization::set_current_transaction_name(status.name.clone());
            synchronization::init_synchronization()?;
        }
        Ok(())
    }

    // ========================================================================
    // Suspend / Resume
    // ========================================================================

    fn suspend(
        &self,
        registry: &ResourceRegistry,
        holder: Option<&Arc<ResourceHolder>>,
    ) -> Result<Option<SuspendedResources>> {
        if synchronization::is_synchronization_active() {
            let synchronizations = self.suspend_synchronization()?;
            let suspended_holder = holder.and_then(|_| self.do_suspend(registry));
            let name = synchronization::current_transaction_name();
            synchronization::set_current_transaction_name(None);
            let read_only = synchronization::is_current_transaction_read_only();
            synchronization::set_current_transaction_read_only(false);
            let was_active = synchronization::is_actual_transaction_active();
            synchronization::set_actual_transaction_active(false);
            Ok(Some(SuspendedResources {
                holder: suspended_holder,
                synchronizations: Some(synchronizations),
                name,
                read_only,
                was_active,
            }))
        } else if holder.is_some() {
            Ok(Some(SuspendedResources {
                holder: self.do_suspend(registry),
                synchronizations: None,
                name: None,
                read_only: false,
                was_active: false,
            }))
        } else {
            Ok(None)
        }
    }

    fn suspend_synchronization(&self) -> Result<Vec<SynchronizationRef>> {
        let listeners = synchronization::synchronizations()?;
        for listener in &listeners {
            listener.suspend();
        }
        synchronization::clear_synchronization()?;
        Ok(listeners)
    }

    fn do_suspend(&self, registry: &ResourceRegistry) -> Option<SuspendedHolder> {
        let key = self.factory.key();
        let local = registry.unbind_if_possible(key);
        // A holder bound further up the chain must not show through either
        let inherited = registry.lookup(key);
        let hid_parent = inherited.is_some() && registry.hide(key);
        let suspended = match (local, inherited) {
            (Some(holder), _) => SuspendedHolder {
                holder,
                local: true,
                hid_parent,
            },
            (None, Some(holder)) => SuspendedHolder {
                holder,
                local: false,
                hid_parent,
            },
            (None, None) => return None,
        };
        self.metrics.suspended();
        debug!(
            session = ?suspended.holder.session_id(),
            registry = registry.name(),
            local = suspended.local,
            "suspended transaction"
        );
        Some(suspended)
    }

    fn resume(
        &self,
        registry: &ResourceRegistry,
        suspended: Option<SuspendedResources>,
    ) -> Result<()> {
        let Some(resources) = suspended else {
            return Ok(());
        };
        if let Some(holder) = resources.holder {
            self.do_resume(registry, holder)?;
        }
        if let Some(listeners) = resources.synchronizations {
            synchronization::set_actual_transaction_active(resources.was_active);
            synchronization::set_current_transaction_read_only(resources.read_only);
            synchronization::set_current_transaction_name(resources.name);
            synchronization::init_synchronization()?;
            for listener in listeners {
                listener.resume();
                synchronization::register_synchronization(listener)?;
            }
        }
        Ok(())
    }

    fn do_resume(&self, registry: &ResourceRegistry, suspended: SuspendedHolder) -> Result<()> {
        let key = self.factory.key();
        // Left behind by non-transactional code in the inner scope
        if registry.has_local_resource(key) {
            registry.unbind_if_possible(key);
        }
        if suspended.hid_parent {
            registry.unhide(key);
        }
        debug!(session = ?suspended.holder.session_id(), "resuming suspended transaction");
        if suspended.local {
            registry.bind(key, suspended.holder)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Commit the scope described by `status`
    ///
    /// Only a status that began the native transaction commits it; a
    /// participating commit just closes the inner scope.
    pub fn commit(&self, status: &mut TransactionStatus) -> Result<()> {
        if status.completed {
            return Err(Error::IllegalTransactionState(
                "Transaction is already completed - do not call commit or rollback more than once per transaction"
                    .into(),
            ));
        }
        if status.is_local_rollback_only() {
            debug!("transactional code has requested rollback");
            return self.process_rollback(status, false);
        }
        if status.is_global_rollback_only() {
            debug!("global transaction is marked as rollback-only but transactional code requested commit");
            return self.process_rollback(status, true);
        }
        self.process_commit(status)
    }

    fn process_commit(&self, status: &mut TransactionStatus) -> Result<()> {
        let result = self.commit_steps(status);
        self.finish(status, result)
    }

    fn commit_steps(&self, status: &mut TransactionStatus) -> Result<()> {
        if let Err(e) = self.trigger_before_commit(status) {
            self.trigger_before_completion(status);
            self.rollback_on_commit_exception(status, &e);
            return Err(e);
        }
        self.trigger_before_completion(status);

        let mut unexpected_rollback = false;
        let committed = if status.has_savepoint() {
            unexpected_rollback = status.is_global_rollback_only();
            self.release_held_savepoint(status)
        } else if status.new_transaction {
            unexpected_rollback = status.is_global_rollback_only();
            self.do_commit(status)
        } else {
            if self.config.fail_early_on_global_rollback_only {
                unexpected_rollback = status.is_global_rollback_only();
            }
            Ok(())
        };

        if let Err(e) = committed {
            match &e {
                Error::TransactionSystem { .. } if !self.config.rollback_on_commit_failure => {
                    self.trigger_after_completion(status, CompletionStatus::Unknown);
                }
                _ => self.rollback_on_commit_exception(status, &e),
            }
            return Err(e);
        }

        if unexpected_rollback {
            self.trigger_after_completion(status, CompletionStatus::RolledBack);
            return Err(Error::UnexpectedRollback(
                "Transaction silently rolled back because it has been marked as rollback-only"
                    .into(),
            ));
        }

        self.trigger_after_commit(status);
        self.trigger_after_completion(status, CompletionStatus::Committed);
        Ok(())
    }

    fn do_commit(&self, status: &TransactionStatus) -> Result<()> {
        let Some(holder) = &status.holder else {
            return Ok(());
        };
        let Some(native) = holder.transaction() else {
            debug!("no native transaction to commit");
            return Ok(());
        };
        let state = native.state();
        if !state.can_commit() {
            debug!(state = %state, "native transaction cannot commit, skipping");
            return Ok(());
        }
        if status.debug {
            debug!(session = ?holder.session_id(), "committing transaction");
        }
        native
            .commit()
            .map_err(|e| native_failure("could not commit transaction", e))?;
        self.metrics.committed();
        Ok(())
    }

    fn rollback_on_commit_exception(&self, status: &TransactionStatus, cause: &Error) {
        debug!(error = %cause, "initiating rollback after commit failure");
        if status.new_transaction {
            if let Err(e) = self.do_rollback(status) {
                error!(error = %e, cause = %cause, "rollback after commit failure failed");
                self.trigger_after_completion(status, CompletionStatus::Unknown);
                return;
            }
        } else if status.has_transaction() && self.config.global_rollback_on_participation_failure {
            self.do_set_rollback_only(status);
        }
        self.trigger_after_completion(status, CompletionStatus::RolledBack);
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Roll back the scope described by `status`
    ///
    /// A participating scope marks the shared transaction rollback-only and
    /// leaves the native rollback to the owner.
    pub fn rollback(&self, status: &mut TransactionStatus) -> Result<()> {
        if status.completed {
            return Err(Error::IllegalTransactionState(
                "Transaction is already completed - do not call commit or rollback more than once per transaction"
                    .into(),
            ));
        }
        self.process_rollback(status, false)
    }

    fn process_rollback(&self, status: &mut TransactionStatus, unexpected: bool) -> Result<()> {
        let result = self.rollback_steps(status, unexpected);
        self.finish(status, result)
    }

    fn rollback_steps(&self, status: &mut TransactionStatus, unexpected: bool) -> Result<()> {
        let mut unexpected_rollback = unexpected;
        self.trigger_before_completion(status);

        let rolled_back = if status.has_savepoint() {
            debug!("rolling back transaction to savepoint");
            self.rollback_to_held_savepoint(status)
        } else if status.new_transaction {
            debug!("initiating transaction rollback");
            self.do_rollback(status)
        } else {
            if status.has_transaction() {
                if status.is_local_rollback_only()
                    || self.config.global_rollback_on_participation_failure
                {
                    debug!("participating transaction failed - marking existing transaction as rollback-only");
                    self.do_set_rollback_only(status);
                } else {
                    debug!("participating transaction failed - letting transaction originator decide on rollback");
                }
            } else {
                debug!("should roll back transaction but cannot - no transaction available");
            }
            if !self.config.fail_early_on_global_rollback_only {
                unexpected_rollback = false;
            }
            Ok(())
        };

        if let Err(e) = rolled_back {
            self.trigger_after_completion(status, CompletionStatus::Unknown);
            return Err(e);
        }
        self.trigger_after_completion(status, CompletionStatus::RolledBack);

        if unexpected_rollback {
            return Err(Error::UnexpectedRollback(
                "Transaction rolled back because it has been marked as rollback-only".into(),
            ));
        }
        Ok(())
    }

    fn do_rollback(&self, status: &TransactionStatus) -> Result<()> {
        let Some(holder) = &status.holder else {
            return Ok(());
        };
        let result = match holder.transaction() {
            Some(native) if native.state().can_rollback() => {
                if status.debug {
                    debug!(session = ?holder.session_id(), "rolling back transaction");
                }
                native
                    .rollback()
                    .map_err(|e| native_failure("could not roll back transaction", e))
                    .map(|()| self.metrics.rolled_back())
            }
            Some(native) => {
                debug!(state = %native.state(), "native transaction cannot roll back, skipping");
                Ok(())
            }
            None => Ok(()),
        };
        if !status.new_session && !self.config.factory_managed_sessions {
            // Pre-bound session: drop pending work so it cannot leak into later use
            if let Err(e) = holder.session().clear() {
                warn!(error = %e, "could not clear pre-bound session after rollback");
            }
        }
        result
    }

    fn do_set_rollback_only(&self, status: &TransactionStatus) {
        if let Some(holder) = &status.holder {
            if status.debug {
                debug!(session = ?holder.session_id(), "setting transaction rollback-only");
            }
            holder.set_rollback_only();
        }
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    fn rollback_to_held_savepoint(&self, status: &mut TransactionStatus) -> Result<()> {
        let (Some(holder), Some(savepoint)) = (status.holder.clone(), status.savepoint) else {
            return Err(Error::IllegalTransactionState(
                "Cannot roll back to savepoint - no savepoint associated with current transaction"
                    .into(),
            ));
        };
        let native = holder.transaction().ok_or_else(|| {
            Error::IllegalTransactionState("no native transaction for savepoint".into())
        })?;
        native
            .rollback_to_savepoint(savepoint)
            .map_err(|e| native_failure("could not roll back to savepoint", e))?;
        native
            .release_savepoint(savepoint)
            .map_err(|e| native_failure("could not release savepoint", e))?;
        holder.pop_savepoint(savepoint);
        status.savepoint = None;
        Ok(())
    }

    fn release_held_savepoint(&self, status: &mut TransactionStatus) -> Result<()> {
        let (Some(holder), Some(savepoint)) = (status.holder.clone(), status.savepoint) else {
            return Err(Error::IllegalTransactionState(
                "Cannot release savepoint - no savepoint associated with current transaction"
                    .into(),
            ));
        };
        if let Some(native) = holder.transaction() {
            native
                .release_savepoint(savepoint)
                .map_err(|e| native_failure("could not release savepoint", e))?;
        }
        holder.pop_savepoint(savepoint);
        status.savepoint = None;
        Ok(())
    }

    // ========================================================================
    // Synchronization triggers
    // ========================================================================

    fn trigger_before_commit(&self, status: &TransactionStatus) -> Result<()> {
        if status.new_synchronization {
            trace!("triggering before-commit synchronization");
            synchronization::trigger_before_commit(status.read_only)?;
        }
        Ok(())
    }

    fn trigger_before_completion(&self, status: &TransactionStatus) {
        if status.new_synchronization {
            trace!("triggering before-completion synchronization");
            synchronization::trigger_before_completion();
        }
    }

    fn trigger_after_commit(&self, status: &TransactionStatus) {
        if status.new_synchronization {
            trace!("triggering after-commit synchronization");
            synchronization::trigger_after_commit();
        }
    }

    fn trigger_after_completion(&self, status: &TransactionStatus, completion: CompletionStatus) {
        if !status.new_synchronization {
            return;
        }
        let listeners = synchronization::synchronizations().unwrap_or_default();
        synchronization::clear_synchronization_if_active();
        if !status.has_transaction() || status.new_transaction {
            trace!(status = %completion, "triggering after-completion synchronization");
            synchronization::invoke_after_completion(&listeners, completion);
        } else if !listeners.is_empty() {
            // Joined a transaction this coordinator did not begin: its outcome is unknown here
            debug!("cannot register after-completion with existing transaction, invoking immediately with unknown outcome");
            synchronization::invoke_after_completion(&listeners, CompletionStatus::Unknown);
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    fn finish(&self, status: &mut TransactionStatus, result: Result<()>) -> Result<()> {
        let cleanup = self.cleanup_after_completion(status);
        match (result, cleanup) {
            (Err(e), Err(cleanup_error)) => {
                error!(error = %cleanup_error, "cleanup after failed completion also failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), cleanup) => cleanup,
        }
    }

    fn cleanup_after_completion(&self, status: &mut TransactionStatus) -> Result<()> {
        status.completed = true;
        if status.new_synchronization {
            synchronization::clear();
        }
        if status.new_transaction {
            self.do_cleanup_after_completion(status);
            self.metrics.completed();
        } else if let Some(holder) = &status.holder {
            holder.released();
        }
        if let Some(suspended) = status.suspended.take() {
            debug!("resuming suspended transaction after completion of inner transaction");
            self.resume(&status.registry, Some(suspended))?;
        }
        Ok(())
    }

    fn do_cleanup_after_completion(&self, status: &TransactionStatus) {
        let Some(holder) = &status.holder else {
            return;
        };
        if status.new_holder {
            status.registry.unbind_if_possible(self.factory.key());
        }
        let remaining = holder.released();
        if status.new_session {
            if remaining == 0 {
                debug!(session = ?holder.session_id(), "closing session after transaction");
                close_session(self.factory.as_ref(), holder.session().as_ref());
            } else {
                warn!(
                    session = ?holder.session_id(),
                    remaining,
                    "not closing session still referenced by participants"
                );
            }
        } else {
            debug!(session = ?holder.session_id(), "not closing pre-bound session after transaction");
        }
        holder.clear();
    }

    // ========================================================================
    // Programmatic demarcation
    // ========================================================================

    /// Run `work` inside a transaction described by `definition`
    ///
    /// Commits when `work` succeeds and rolls back when it fails. If the
    /// rollback itself fails, that failure is logged and the error from
    /// `work` is returned.
    pub fn execute<T, F>(&self, definition: &TransactionDefinition, work: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionStatus) -> Result<T>,
    {
        let mut status = self.get_transaction(definition)?;
        match work(&mut status) {
            Ok(value) => {
                self.commit(&mut status)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback(&mut status) {
                    error!(
                        error = %rollback_error,
                        cause = %e,
                        "rollback after application error failed"
                    );
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("factory", &self.factory.describe())
            .field("config", &self.config)
            .finish()
    }
}

/// Classify a failed native commit or rollback
fn native_failure(message: &str, error: Error) -> Error {
    match error {
        Error::Store(source) if source.kind == StoreErrorKind::Transaction => {
            Error::TransactionSystem {
                message: message.to_string(),
                source,
            }
        }
        other => translate_error(other),
    }
}
