//! Control plane service implementation.
//!
//! This module provides the `CompanionPlane` trait and the `CompanionService`
//! implementation that ties the directory, presence tracker, call coordinator
//! and signaling relay to one store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_core::{CallId, ConnectionId, ContactAddress, UserId};
use tether_store::{Call, Connection, PresenceRecord, SignalingMessage, Store};

use crate::error::Result;
use crate::retry::with_backoff;
use crate::types::{
    CompanionPresence, ControlConfig, HeartbeatRequest, InviteRequest, RespondAction,
    SendSignalRequest, SweepReport,
};
use crate::{authz, calls, directory, presence, signaling, sweep};

/// Trait defining the control plane operations.
///
/// Every method authorizes the acting user itself; callers only need to
/// supply an authenticated identity.
#[async_trait]
pub trait CompanionPlane: Send + Sync {
    // =========================================================================
    // Connection Directory
    // =========================================================================

    /// Invite a companion by contact address.
    ///
    /// Idempotent per (owner, contact): an existing open connection is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidContact` for a malformed address.
    /// Returns `ControlError::ConnectionLimit` if the owner has too many open connections.
    async fn invite(&self, owner_id: &UserId, request: InviteRequest) -> Result<Connection>;

    /// Bind a contact to an authenticated account and activate pending invites.
    async fn resolve_on_first_contact(
        &self,
        contact: &ContactAddress,
        companion_id: &UserId,
    ) -> Result<Vec<Connection>>;

    /// Revoke a connection. Owner only.
    async fn revoke(&self, owner_id: &UserId, connection_id: &ConnectionId) -> Result<Connection>;

    /// Block a connection. Owner only.
    async fn block(&self, owner_id: &UserId, connection_id: &ConnectionId) -> Result<Connection>;

    /// Toggle whether the companion may see the owner's availability.
    async fn set_availability_sharing(
        &self,
        owner_id: &UserId,
        connection_id: &ConnectionId,
        share: bool,
    ) -> Result<Connection>;

    /// Connections the user owns or is the companion of.
    async fn list_connections(&self, user_id: &UserId) -> Result<Vec<Connection>>;

    /// Returns true iff an active connection links the two users.
    async fn is_active_between(&self, a: &UserId, b: &UserId) -> Result<bool>;

    // =========================================================================
    // Presence Tracker
    // =========================================================================

    /// Record a heartbeat.
    async fn heartbeat(&self, user_id: &UserId, request: HeartbeatRequest)
        -> Result<PresenceRecord>;

    /// Presence of every user actively connected to the viewer.
    async fn query_for(&self, viewer_id: &UserId) -> Result<BTreeMap<UserId, CompanionPresence>>;

    // =========================================================================
    // Call Coordinator
    // =========================================================================

    /// Place a call.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotConnected` without an active connection.
    /// Returns `ControlError::CallInProgress` if a call is already open for the pair.
    async fn initiate(&self, initiator_id: &UserId, recipient_id: &UserId) -> Result<Call>;

    /// Accept or decline a ringing call.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidTransition` unless the call is ringing.
    async fn respond(
        &self,
        call_id: &CallId,
        responder_id: &UserId,
        action: RespondAction,
    ) -> Result<Call>;

    /// Hang up. Ending a terminal call returns it unchanged.
    async fn end(&self, call_id: &CallId, actor_id: &UserId) -> Result<Call>;

    /// Get a call as one of its participants.
    async fn get_call(&self, call_id: &CallId, user_id: &UserId) -> Result<Call>;

    /// Ringing calls addressed to the user.
    async fn incoming_calls(&self, user_id: &UserId) -> Result<Vec<Call>>;

    // =========================================================================
    // Signaling Relay
    // =========================================================================

    /// Relay a message to the other participant of a call.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::CallClosed` once the call is terminal.
    async fn send_signal(
        &self,
        call_id: &CallId,
        from_user_id: &UserId,
        request: SendSignalRequest,
    ) -> Result<SignalingMessage>;

    /// Messages addressed to the user newer than `since`, oldest first.
    async fn receive_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
        call_id: Option<CallId>,
    ) -> Result<Vec<SignalingMessage>>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Expire ringing calls past the ring timeout.
    async fn expire_ringing_calls(&self) -> Result<Vec<Call>>;

    /// Delete signals of calls closed longer than the grace period.
    async fn collect_signals(&self) -> Result<usize>;

    /// Run every maintenance task once.
    async fn sweep(&self) -> Result<SweepReport> {
        let expired_calls = self.expire_ringing_calls().await?.len();
        let signals_removed = self.collect_signals().await?;
        Ok(SweepReport {
            expired_calls,
            signals_removed,
        })
    }
}

/// The main control plane service implementation.
pub struct CompanionService<S: Store> {
    store: Arc<S>,
    config: ControlConfig,
}

impl<S: Store> CompanionService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(store: Arc<S>, config: ControlConfig) -> Self {
        Self { store, config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ControlConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }
}

#[async_trait]
impl<S: Store + 'static> CompanionPlane for CompanionService<S> {
    // =========================================================================
    // Connection Directory
    // =========================================================================

    async fn invite(&self, owner_id: &UserId, request: InviteRequest) -> Result<Connection> {
        let (connection, inserted) = with_backoff(&self.config.retry, || {
            directory::invite(&*self.store, &self.config, owner_id, &request, Utc::now())
        })
        .await?;

        if inserted {
            tracing::info!(
                connection_id = %connection.id,
                owner_id = %owner_id,
                status = ?connection.status,
                "Created connection"
            );
        }

        Ok(connection)
    }

    async fn resolve_on_first_contact(
        &self,
        contact: &ContactAddress,
        companion_id: &UserId,
    ) -> Result<Vec<Connection>> {
        let activated = with_backoff(&self.config.retry, || {
            directory::resolve_on_first_contact(&*self.store, contact, companion_id, Utc::now())
        })
        .await?;

        for connection in &activated {
            tracing::info!(
                connection_id = %connection.id,
                companion_id = %companion_id,
                "Activated connection"
            );
        }

        Ok(activated)
    }

    async fn revoke(&self, owner_id: &UserId, connection_id: &ConnectionId) -> Result<Connection> {
        let result = with_backoff(&self.config.retry, || {
            directory::revoke(&*self.store, owner_id, connection_id, Utc::now())
        })
        .await?;

        if result.is_applied() {
            tracing::info!(connection_id = %connection_id, "Revoked connection");
        }

        Ok(result.into_inner())
    }

    async fn block(&self, owner_id: &UserId, connection_id: &ConnectionId) -> Result<Connection> {
        let result = with_backoff(&self.config.retry, || {
            directory::block(&*self.store, owner_id, connection_id, Utc::now())
        })
        .await?;

        if result.is_applied() {
            tracing::info!(connection_id = %connection_id, "Blocked connection");
        }

        Ok(result.into_inner())
    }

    async fn set_availability_sharing(
        &self,
        owner_id: &UserId,
        connection_id: &ConnectionId,
        share: bool,
    ) -> Result<Connection> {
        let connection = with_backoff(&self.config.retry, || {
            directory::set_availability_sharing(&*self.store, owner_id, connection_id, share)
        })
        .await?;

        tracing::info!(connection_id = %connection_id, share, "Updated availability sharing");

        Ok(connection)
    }

    async fn list_connections(&self, user_id: &UserId) -> Result<Vec<Connection>> {
        with_backoff(&self.config.retry, || {
            directory::list_connections(&*self.store, user_id)
        })
        .await
    }

    async fn is_active_between(&self, a: &UserId, b: &UserId) -> Result<bool> {
        with_backoff(&self.config.retry, || authz::is_active_between(&*self.store, a, b)).await
    }

    // =========================================================================
    // Presence Tracker
    // =========================================================================

    async fn heartbeat(
        &self,
        user_id: &UserId,
        request: HeartbeatRequest,
    ) -> Result<PresenceRecord> {
        let record = with_backoff(&self.config.retry, || {
            presence::heartbeat(&*self.store, user_id, &request, Utc::now())
        })
        .await?;

        tracing::debug!(user_id = %user_id, status = ?record.status, "Processed heartbeat");

        Ok(record)
    }

    async fn query_for(&self, viewer_id: &UserId) -> Result<BTreeMap<UserId, CompanionPresence>> {
        with_backoff(&self.config.retry, || {
            presence::query_for(&*self.store, &self.config, viewer_id, Utc::now())
        })
        .await
    }

    // =========================================================================
    // Call Coordinator
    // =========================================================================

    async fn initiate(&self, initiator_id: &UserId, recipient_id: &UserId) -> Result<Call> {
        let call = with_backoff(&self.config.retry, || {
            calls::initiate(&*self.store, initiator_id, recipient_id, Utc::now())
        })
        .await?;

        tracing::info!(
            call_id = %call.id,
            initiator_id = %initiator_id,
            recipient_id = %recipient_id,
            "Call ringing"
        );

        Ok(call)
    }

    async fn respond(
        &self,
        call_id: &CallId,
        responder_id: &UserId,
        action: RespondAction,
    ) -> Result<Call> {
        let call = with_backoff(&self.config.retry, || {
            calls::respond(&*self.store, call_id, responder_id, action, Utc::now())
        })
        .await?;

        tracing::info!(call_id = %call_id, status = ?call.status, "Call answered");

        Ok(call)
    }

    async fn end(&self, call_id: &CallId, actor_id: &UserId) -> Result<Call> {
        let result = with_backoff(&self.config.retry, || {
            calls::end(&*self.store, call_id, actor_id, Utc::now())
        })
        .await?;

        let applied = result.is_applied();
        let call = result.into_inner();
        if applied {
            tracing::info!(
                call_id = %call_id,
                status = ?call.status,
                duration_seconds = ?call.duration_seconds,
                "Call ended"
            );
        }

        Ok(call)
    }

    async fn get_call(&self, call_id: &CallId, user_id: &UserId) -> Result<Call> {
        with_backoff(&self.config.retry, || {
            calls::get_call(&*self.store, call_id, user_id)
        })
        .await
    }

    async fn incoming_calls(&self, user_id: &UserId) -> Result<Vec<Call>> {
        with_backoff(&self.config.retry, || calls::incoming_calls(&*self.store, user_id)).await
    }

    // =========================================================================
    // Signaling Relay
    // =========================================================================

    async fn send_signal(
        &self,
        call_id: &CallId,
        from_user_id: &UserId,
        request: SendSignalRequest,
    ) -> Result<SignalingMessage> {
        let message = with_backoff(&self.config.retry, || {
            signaling::send(&*self.store, call_id, from_user_id, &request, Utc::now())
        })
        .await?;

        tracing::debug!(
            call_id = %call_id,
            message_id = %message.id,
            kind = ?message.kind,
            "Relayed signal"
        );

        Ok(message)
    }

    async fn receive_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
        call_id: Option<CallId>,
    ) -> Result<Vec<SignalingMessage>> {
        with_backoff(&self.config.retry, || {
            signaling::receive_since(&*self.store, &self.config, user_id, since, call_id.as_ref())
        })
        .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    async fn expire_ringing_calls(&self) -> Result<Vec<Call>> {
        with_backoff(&self.config.retry, || {
            sweep::expire_ringing_calls(&*self.store, &self.config, Utc::now())
        })
        .await
    }

    async fn collect_signals(&self) -> Result<usize> {
        with_backoff(&self.config.retry, || {
            sweep::collect_signals(&*self.store, &self.config, Utc::now())
        })
        .await
    }
}
