//! In-memory [`Repository`] fake for fast, no-database unit tests.
//!
//! Grounded in the same "tests supply in-memory fakes instead of hitting a
//! live backend" shape used throughout the grounding project's own test
//! modules. This implementation enforces the same invariants the Postgres
//! schema enforces with constraints (unique serials, one active QR per
//! property, one pending transfer per property) in plain Rust, guarded by a
//! single `tokio::sync::Mutex` over all state — simplicity over throughput,
//! since this exists only for tests.

use super::{
    CreatePropertyInput, CreateUserInput, NewQrCode, PropertyFilters, Repository, ResolveDecision,
};
use crate::error::HandReceiptError;
use crate::ledger::{build_entry, genesis_hash, verify_chain, LedgerEntry as PureLedgerEntry};
use crate::types::{
    LedgerEvent, LedgerEventType, Property, PropertyStatus, QRCode, Session, Transfer,
    TransferDirection, TransferStatus, User, UserStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    users: HashMap<i64, User>,
    next_user_id: i64,
    properties: HashMap<i64, Property>,
    next_property_id: i64,
    qr_codes: HashMap<i64, QRCode>,
    next_qr_id: i64,
    transfers: HashMap<i64, Transfer>,
    next_transfer_id: i64,
    ledger: Vec<LedgerEvent>,
    last_hash: String,
    sessions: HashMap<uuid::Uuid, Session>,
}

impl State {
    fn new() -> Self {
        Self {
            last_hash: genesis_hash(),
            next_user_id: 1,
            next_property_id: 1,
            next_qr_id: 1,
            next_transfer_id: 1,
            ..Default::default()
        }
    }

    fn append(
        &mut self,
        event_type: LedgerEventType,
        property_id: i64,
        actor_user_id: i64,
        payload: Value,
    ) -> LedgerEvent {
        let sequence = self.ledger.len() as i64 + 1;
        let entry: PureLedgerEntry = build_entry(
            sequence,
            event_type,
            property_id,
            actor_user_id,
            payload,
            &self.last_hash,
            Utc::now(),
        );
        let event = LedgerEvent {
            sequence: entry.sequence,
            event_type: entry.event_type,
            property_id: entry.property_id,
            actor_user_id: entry.actor_user_id,
            payload: entry.payload,
            prev_hash: entry.prev_hash,
            hash: entry.hash.clone(),
            created_at: entry.created_at,
        };
        self.last_hash = event.hash.clone();
        self.ledger.push(event.clone());
        event
    }
}

pub struct MemoryRepository {
    state: Mutex<State>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, input: CreateUserInput) -> Result<User, HandReceiptError> {
        let mut state = self.state.lock().await;
        if state
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&input.username))
        {
            return Err(HandReceiptError::InvalidInput(format!(
                "username already exists: {}",
                input.username
            )));
        }
        let id = state.next_user_id;
        state.next_user_id += 1;
        let user = User {
            id,
            username: input.username,
            password_hash: input.password_hash,
            name: input.name,
            rank: input.rank,
            unit: input.unit,
            role: input.role,
            status: UserStatus::Active,
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, HandReceiptError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, HandReceiptError> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn search_users(&self, query: &str, limit: i64) -> Result<Vec<User>, HandReceiptError> {
        let state = self.state.lock().await;
        let query = query.to_lowercase();
        let mut matches: Vec<User> = state
            .users
            .values()
            .filter(|u| {
                u.username.to_lowercase().contains(&query) || u.name.to_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.username.cmp(&b.username));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn set_user_status(&self, id: i64, status: UserStatus) -> Result<User, HandReceiptError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| HandReceiptError::UserNotFound(id.to_string()))?;
        user.status = status;
        Ok(user.clone())
    }

    async fn create_property(
        &self,
        input: CreatePropertyInput,
        actor_user_id: i64,
    ) -> Result<(Property, LedgerEvent), HandReceiptError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .properties
            .values()
            .find(|p| p.serial_number == input.serial_number)
        {
            return Err(HandReceiptError::SerialAlreadyExists {
                serial: input.serial_number,
                existing_id: existing.id,
            });
        }
        let id = state.next_property_id;
        state.next_property_id += 1;
        let now = Utc::now();
        let property = Property {
            id,
            name: input.name,
            serial_number: input.serial_number,
            nsn: input.nsn,
            lin: input.lin,
            description: input.description,
            current_status: input.current_status,
            assigned_to_user_id: input.assigned_to_user_id,
            property_model_id: input.property_model_id,
            created_at: now,
            updated_at: now,
        };
        state.properties.insert(id, property.clone());
        let payload = serde_json::json!({
            "name": property.name,
            "serialNumber": property.serial_number,
            "assignedToUserId": property.assigned_to_user_id,
        });
        let event = state.append(LedgerEventType::ItemCreate, id, actor_user_id, payload);
        Ok((property, event))
    }

    async fn get_property_by_id(&self, id: i64) -> Result<Option<Property>, HandReceiptError> {
        Ok(self.state.lock().await.properties.get(&id).cloned())
    }

    async fn get_property_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<Property>, HandReceiptError> {
        Ok(self
            .state
            .lock()
            .await
            .properties
            .values()
            .find(|p| p.serial_number == serial)
            .cloned())
    }

    async fn list_properties(
        &self,
        filters: PropertyFilters,
    ) -> Result<Vec<Property>, HandReceiptError> {
        let state = self.state.lock().await;
        let mut matches: Vec<Property> = state
            .properties
            .values()
            .filter(|p| {
                filters
                    .assigned_to_user_id
                    .map_or(true, |uid| p.assigned_to_user_id == Some(uid))
                    && filters.status.map_or(true, |s| p.current_status == s)
                    && filters
                        .category
                        .as_ref()
                        .map_or(true, |c| p.name.to_lowercase().contains(&c.to_lowercase()))
            })
            .cloned()
            .collect();
        matches.sort_by_key(|p| p.id);
        let offset = filters.offset.max(0) as usize;
        let limit = filters.limit.max(0) as usize;
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_property_status(
        &self,
        property_id: i64,
        new_status: PropertyStatus,
        actor_user_id: i64,
        note: Option<String>,
    ) -> Result<(Property, LedgerEvent), HandReceiptError> {
        let mut state = self.state.lock().await;
        let previous_status = {
            let property = state
                .properties
                .get(&property_id)
                .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;
            property.current_status
        };

        if matches!(new_status, PropertyStatus::Lost) {
            let qr_id = state
                .qr_codes
                .values()
                .find(|q| q.inventory_item_id == property_id && q.is_active)
                .map(|q| q.id);
            if let Some(qr_id) = qr_id {
                if let Some(qr) = state.qr_codes.get_mut(&qr_id) {
                    qr.is_active = false;
                    qr.deactivated_reason = Some("property_lost".to_string());
                    qr.deactivated_at = Some(Utc::now());
                }
            }
        }

        let property = state
            .properties
            .get_mut(&property_id)
            .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;
        property.current_status = new_status;
        property.updated_at = Utc::now();
        let property = property.clone();

        let payload = serde_json::json!({"from": previous_status, "to": new_status, "note": note});
        let event = state.append(LedgerEventType::StatusChange, property_id, actor_user_id, payload);
        Ok((property, event))
    }

    async fn generate_qr_code(
        &self,
        new_qr: NewQrCode,
    ) -> Result<(QRCode, Vec<LedgerEvent>), HandReceiptError> {
        let mut state = self.state.lock().await;
        let mut events = Vec::new();

        if state
            .qr_codes
            .values()
            .any(|q| q.qr_code_hash == new_qr.qr_code_hash)
        {
            return Err(HandReceiptError::QRHashCollision);
        }

        let previous_id = state
            .qr_codes
            .values()
            .find(|q| q.inventory_item_id == new_qr.property_id && q.is_active)
            .map(|q| q.id);
        if let Some(previous_id) = previous_id {
            if let Some(qr) = state.qr_codes.get_mut(&previous_id) {
                qr.is_active = false;
                qr.deactivated_reason = Some("superseded".to_string());
                qr.deactivated_at = Some(Utc::now());
            }
            let event = state.append(
                LedgerEventType::QrDeactivated,
                new_qr.property_id,
                new_qr.generated_by_user_id,
                serde_json::json!({"qrId": previous_id, "reason": "superseded"}),
            );
            events.push(event);
        }

        let id = state.next_qr_id;
        state.next_qr_id += 1;
        let qr = QRCode {
            id,
            inventory_item_id: new_qr.property_id,
            qr_code_hash: new_qr.qr_code_hash.clone(),
            payload_json: new_qr.payload_json,
            generated_by_user_id: new_qr.generated_by_user_id,
            generated_at: new_qr.generated_at,
            is_active: true,
            deactivated_reason: None,
            deactivated_at: None,
        };
        state.qr_codes.insert(id, qr.clone());

        let event = state.append(
            LedgerEventType::QrGenerated,
            new_qr.property_id,
            new_qr.generated_by_user_id,
            serde_json::json!({"qrId": id, "qrHash": qr.qr_code_hash}),
        );
        events.push(event);

        Ok((qr, events))
    }

    async fn get_active_qr_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<QRCode>, HandReceiptError> {
        Ok(self
            .state
            .lock()
            .await
            .qr_codes
            .values()
            .find(|q| q.inventory_item_id == property_id && q.is_active)
            .cloned())
    }

    async fn get_qr_by_hash(&self, hash: &str) -> Result<Option<QRCode>, HandReceiptError> {
        Ok(self
            .state
            .lock()
            .await
            .qr_codes
            .values()
            .find(|q| q.qr_code_hash == hash)
            .cloned())
    }

    async fn get_qr_by_id(&self, id: i64) -> Result<Option<QRCode>, HandReceiptError> {
        Ok(self.state.lock().await.qr_codes.get(&id).cloned())
    }

    async fn list_qr_codes(&self, property_id: Option<i64>) -> Result<Vec<QRCode>, HandReceiptError> {
        let state = self.state.lock().await;
        let mut matches: Vec<QRCode> = state
            .qr_codes
            .values()
            .filter(|q| property_id.map_or(true, |id| q.inventory_item_id == id))
            .cloned()
            .collect();
        matches.sort_by_key(|q| std::cmp::Reverse(q.id));
        Ok(matches)
    }

    async fn deactivate_qr_code(
        &self,
        qr_id: i64,
        actor_user_id: i64,
        reason: &str,
    ) -> Result<(QRCode, LedgerEvent), HandReceiptError> {
        let mut state = self.state.lock().await;
        let property_id = {
            let qr = state
                .qr_codes
                .get(&qr_id)
                .ok_or_else(|| HandReceiptError::QRNotFound(qr_id.to_string()))?;
            qr.inventory_item_id
        };
        {
            let qr = state.qr_codes.get_mut(&qr_id).unwrap();
            qr.is_active = false;
            qr.deactivated_reason = Some(reason.to_string());
            qr.deactivated_at = Some(Utc::now());
        }
        let qr = state.qr_codes.get(&qr_id).unwrap().clone();
        let event = state.append(
            LedgerEventType::QrDeactivated,
            property_id,
            actor_user_id,
            serde_json::json!({"qrId": qr_id, "reason": reason}),
        );
        Ok((qr, event))
    }

    async fn create_transfer(
        &self,
        property_id: i64,
        from_user_id: i64,
        to_user_id: i64,
        initiating_qr_code_id: Option<i64>,
        actor_user_id: i64,
    ) -> Result<(Transfer, LedgerEvent), HandReceiptError> {
        let mut state = self.state.lock().await;
        let property = state
            .properties
            .get(&property_id)
            .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;
        if property.assigned_to_user_id != Some(from_user_id) {
            return Err(HandReceiptError::OwnershipChanged);
        }
        if state
            .transfers
            .values()
            .any(|t| t.property_id == property_id && t.status == TransferStatus::Requested)
        {
            return Err(HandReceiptError::TransferAlreadyPending);
        }

        let id = state.next_transfer_id;
        state.next_transfer_id += 1;
        let transfer = Transfer {
            id,
            property_id,
            from_user_id,
            to_user_id,
            status: TransferStatus::Requested,
            request_timestamp: Utc::now(),
            resolution_timestamp: None,
            notes: None,
            initiating_qr_code_id,
        };
        state.transfers.insert(id, transfer.clone());

        let event = state.append(
            LedgerEventType::TransferRequest,
            property_id,
            actor_user_id,
            serde_json::json!({"transferId": id, "fromUserId": from_user_id, "toUserId": to_user_id}),
        );
        Ok((transfer, event))
    }

    async fn get_transfer_by_id(&self, id: i64) -> Result<Option<Transfer>, HandReceiptError> {
        Ok(self.state.lock().await.transfers.get(&id).cloned())
    }

    async fn get_pending_transfer_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<Transfer>, HandReceiptError> {
        Ok(self
            .state
            .lock()
            .await
            .transfers
            .values()
            .find(|t| t.property_id == property_id && t.status == TransferStatus::Requested)
            .cloned())
    }

    async fn list_transfers(
        &self,
        user_id: i64,
        status: Option<Vec<TransferStatus>>,
        direction: TransferDirection,
    ) -> Result<Vec<Transfer>, HandReceiptError> {
        let state = self.state.lock().await;
        let statuses = status.unwrap_or_else(|| vec![TransferStatus::Requested]);
        let mut matches: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| {
                let direction_match = match direction {
                    TransferDirection::Incoming => t.to_user_id == user_id,
                    TransferDirection::Outgoing => t.from_user_id == user_id,
                    TransferDirection::All => t.to_user_id == user_id || t.from_user_id == user_id,
                };
                direction_match && statuses.contains(&t.status)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|t| std::cmp::Reverse(t.request_timestamp));
        Ok(matches)
    }

    async fn resolve_transfer(
        &self,
        transfer_id: i64,
        decision: ResolveDecision,
        actor_user_id: i64,
        notes: Option<String>,
    ) -> Result<(Transfer, Vec<LedgerEvent>), HandReceiptError> {
        let mut state = self.state.lock().await;
        let mut events = Vec::new();

        let (property_id, from_user_id, to_user_id) = {
            let transfer = state
                .transfers
                .get(&transfer_id)
                .ok_or_else(|| HandReceiptError::TransferNotFound(transfer_id.to_string()))?;
            if transfer.status != TransferStatus::Requested {
                return Err(HandReceiptError::TransferNotPending);
            }
            (transfer.property_id, transfer.from_user_id, transfer.to_user_id)
        };

        if matches!(decision, ResolveDecision::Approved) {
            let property = state
                .properties
                .get(&property_id)
                .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;
            if property.assigned_to_user_id != Some(from_user_id) {
                return Err(HandReceiptError::OwnershipChanged);
            }
            state.properties.get_mut(&property_id).unwrap().assigned_to_user_id = Some(to_user_id);

            let active_qr_id = state
                .qr_codes
                .values()
                .find(|q| q.inventory_item_id == property_id && q.is_active)
                .map(|q| q.id);
            if let Some(qr_id) = active_qr_id {
                if let Some(qr) = state.qr_codes.get_mut(&qr_id) {
                    qr.is_active = false;
                    qr.deactivated_reason = Some("ownership_change".to_string());
                    qr.deactivated_at = Some(Utc::now());
                }
                let event = state.append(
                    LedgerEventType::QrDeactivated,
                    property_id,
                    actor_user_id,
                    serde_json::json!({"qrId": qr_id, "reason": "ownership_change"}),
                );
                events.push(event);
            }
        }

        let transfer = state.transfers.get_mut(&transfer_id).unwrap();
        transfer.status = decision.target_status();
        transfer.resolution_timestamp = Some(Utc::now());
        transfer.notes = notes.clone();
        let transfer = transfer.clone();

        let event = state.append(
            decision.ledger_event_type(),
            property_id,
            actor_user_id,
            serde_json::json!({"transferId": transfer_id, "notes": notes}),
        );
        events.push(event);

        Ok((transfer, events))
    }

    async fn append_correction(
        &self,
        property_id: i64,
        actor_user_id: i64,
        payload: Value,
    ) -> Result<LedgerEvent, HandReceiptError> {
        let mut state = self.state.lock().await;
        Ok(state.append(LedgerEventType::Correction, property_id, actor_user_id, payload))
    }

    async fn ledger_history(
        &self,
        property_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEvent>, HandReceiptError> {
        let state = self.state.lock().await;
        let matches: Vec<LedgerEvent> = state
            .ledger
            .iter()
            .filter(|e| e.property_id == property_id)
            .cloned()
            .collect();
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn ledger_verify(
        &self,
        from_sequence: i64,
        to_sequence: i64,
    ) -> Result<crate::ledger::VerificationReport, HandReceiptError> {
        let state = self.state.lock().await;
        let entries: Vec<PureLedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.sequence >= from_sequence && e.sequence <= to_sequence)
            .map(|e| PureLedgerEntry {
                sequence: e.sequence,
                event_type: e.event_type,
                property_id: e.property_id,
                actor_user_id: e.actor_user_id,
                payload: e.payload.clone(),
                prev_hash: e.prev_hash.clone(),
                hash: e.hash.clone(),
                created_at: e.created_at,
            })
            .collect();
        Ok(verify_chain(&entries))
    }

    async fn create_session(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
        refresh_token_id: Option<uuid::Uuid>,
        refresh_token_hash: Option<String>,
    ) -> Result<Session, HandReceiptError> {
        let mut state = self.state.lock().await;
        let id = uuid::Uuid::new_v4();
        let now = Utc::now();
        let session = Session {
            id,
            user_id,
            created_at: now,
            last_seen_at: now,
            expires_at,
            refresh_token_id,
            refresh_token_hash,
            is_revoked: false,
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: uuid::Uuid) -> Result<Option<Session>, HandReceiptError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn touch_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(&id) {
            session.last_seen_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(&id) {
            session.is_revoked = true;
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: uuid::Uuid,
        refresh_token_id: uuid::Uuid,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, HandReceiptError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&id)
            .filter(|s| !s.is_revoked)
            .ok_or(HandReceiptError::SessionRevoked)?;
        session.refresh_token_id = Some(refresh_token_id);
        session.refresh_token_hash = Some(refresh_token_hash);
        session.expires_at = expires_at;
        session.last_seen_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, HandReceiptError> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn user_input(username: &str) -> CreateUserInput {
        CreateUserInput {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            name: "Test Soldier".to_string(),
            rank: "SPC".to_string(),
            unit: "1-1 IN".to_string(),
            role: Role::Soldier,
        }
    }

    fn property_input(serial: &str, owner: i64) -> CreatePropertyInput {
        CreatePropertyInput {
            name: "M4 Carbine".to_string(),
            serial_number: serial.to_string(),
            nsn: None,
            lin: None,
            description: None,
            current_status: PropertyStatus::Operational,
            assigned_to_user_id: Some(owner),
            property_model_id: None,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_serial() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(user_input("soldier1")).await.unwrap();
        repo.create_property(property_input("SN-1", owner.id), owner.id)
            .await
            .unwrap();
        let err = repo
            .create_property(property_input("SN-1", owner.id), owner.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SerialAlreadyExists");
    }

    #[tokio::test]
    async fn rejects_second_pending_transfer() {
        let repo = MemoryRepository::new();
        let from = repo.create_user(user_input("from_user")).await.unwrap();
        let to = repo.create_user(user_input("to_user")).await.unwrap();
        let (property, _) = repo
            .create_property(property_input("SN-2", from.id), from.id)
            .await
            .unwrap();

        repo.create_transfer(property.id, from.id, to.id, None, from.id)
            .await
            .unwrap();
        let err = repo
            .create_transfer(property.id, from.id, to.id, None, from.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferAlreadyPending");
    }

    #[tokio::test]
    async fn approving_transfer_rebinds_ownership_and_deactivates_qr() {
        let repo = MemoryRepository::new();
        let from = repo.create_user(user_input("owner")).await.unwrap();
        let to = repo.create_user(user_input("recipient")).await.unwrap();
        let (property, _) = repo
            .create_property(property_input("SN-3", from.id), from.id)
            .await
            .unwrap();

        let (qr, _) = repo
            .generate_qr_code(NewQrCode {
                property_id: property.id,
                qr_code_hash: "abc123".to_string(),
                payload_json: serde_json::json!({}),
                generated_by_user_id: from.id,
                generated_at: Utc::now(),
            })
            .await
            .unwrap();

        let (transfer, _) = repo
            .create_transfer(property.id, from.id, to.id, Some(qr.id), from.id)
            .await
            .unwrap();

        let (resolved, events) = repo
            .resolve_transfer(transfer.id, ResolveDecision::Approved, from.id, None)
            .await
            .unwrap();
        assert_eq!(resolved.status, TransferStatus::Approved);
        assert!(events
            .iter()
            .any(|e| e.event_type == LedgerEventType::TransferApproved));

        let updated_property = repo.get_property_by_id(property.id).await.unwrap().unwrap();
        assert_eq!(updated_property.assigned_to_user_id, Some(to.id));

        let qr_after = repo.get_qr_by_id(qr.id).await.unwrap().unwrap();
        assert!(!qr_after.is_active);
    }

    #[tokio::test]
    async fn ledger_chain_verifies_after_several_events() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(user_input("verifier")).await.unwrap();
        let (property, _) = repo
            .create_property(property_input("SN-4", owner.id), owner.id)
            .await
            .unwrap();
        repo.update_property_status(
            property.id,
            PropertyStatus::NeedsMaintenance,
            owner.id,
            Some("routine check".to_string()),
        )
        .await
        .unwrap();

        let report = repo.ledger_verify(1, 100).await.unwrap();
        assert!(report.ok);
    }
}
