//! Transfer State Machine (C5): drives `Requested -> Approved | Rejected |
//! Cancelled`, rebinds ownership atomically, and emits ledger events.
//!
//! Modeled directly on the grounding project's `ConsequenceStageMachine`
//! (`flow.rs`): an explicit guard that fails loudly on any non-adjacent
//! transition rather than a generic state-machine crate.

use crate::error::HandReceiptError;
use crate::qr::{QrEngine, QrPayload};
use crate::repository::{Repository, ResolveDecision};
use crate::types::{Transfer, TransferDirection, TransferStatus, VerificationResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct TransferService {
    repository: Arc<dyn Repository>,
    qr_engine: Arc<QrEngine>,
}

impl TransferService {
    pub fn new(repository: Arc<dyn Repository>, qr_engine: Arc<QrEngine>) -> Self {
        Self {
            repository,
            qr_engine,
        }
    }

    /// Verifies the scanned payload, rejects self-transfers, and — under
    /// one repository transaction — requires no pending transfer already
    /// exists before inserting the new one.
    pub async fn request_by_qr(
        &self,
        payload: &QrPayload,
        _scanned_at: DateTime<Utc>,
        scanner_user_id: i64,
    ) -> Result<Transfer, HandReceiptError> {
        match self.qr_engine.verify(payload).await? {
            VerificationResult::Valid => {}
            VerificationResult::InvalidHash => return Err(HandReceiptError::QRInvalidHash),
            VerificationResult::NotFound => {
                return Err(HandReceiptError::QRNotFound(payload.qr_hash.clone()))
            }
            VerificationResult::Deactivated => return Err(HandReceiptError::QRDeactivated),
            VerificationResult::Outdated => return Err(HandReceiptError::QROutdated),
            VerificationResult::PropertyLost => return Err(HandReceiptError::QRPropertyLost),
        }

        let holder_id: i64 = payload
            .current_holder_id
            .parse()
            .map_err(|_| HandReceiptError::InvalidInput("currentHolderId is not an integer".to_string()))?;
        if scanner_user_id == holder_id {
            return Err(HandReceiptError::SelfTransferForbidden);
        }

        let property_id: i64 = payload
            .item_id
            .parse()
            .map_err(|_| HandReceiptError::InvalidInput("itemId is not an integer".to_string()))?;
        let qr = self
            .repository
            .get_qr_by_hash(&payload.qr_hash)
            .await?
            .ok_or_else(|| HandReceiptError::QRNotFound(payload.qr_hash.clone()))?;

        let (transfer, _event) = self
            .repository
            .create_transfer(property_id, holder_id, scanner_user_id, Some(qr.id), scanner_user_id)
            .await?;
        Ok(transfer)
    }

    /// Without a QR: if the requester is the current holder, it is a push
    /// (`to = recipient`); otherwise a pull (`to = requester`). The
    /// transfer always records the direction of ownership change, not of
    /// the request, per spec §4.5.
    pub async fn request_manual(
        &self,
        property_id: i64,
        recipient_user_id: i64,
        requester_user_id: i64,
    ) -> Result<Transfer, HandReceiptError> {
        let property = self
            .repository
            .get_property_by_id(property_id)
            .await?
            .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;
        let holder_id = property
            .assigned_to_user_id
            .ok_or_else(|| HandReceiptError::InvalidInput("property has no current holder".to_string()))?;

        let (from_user_id, to_user_id) = if requester_user_id == holder_id {
            (holder_id, recipient_user_id)
        } else {
            (holder_id, requester_user_id)
        };
        if from_user_id == to_user_id {
            return Err(HandReceiptError::SelfTransferForbidden);
        }

        let (transfer, _event) = self
            .repository
            .create_transfer(property_id, from_user_id, to_user_id, None, requester_user_id)
            .await?;
        Ok(transfer)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Transfer, HandReceiptError> {
        self.repository
            .get_transfer_by_id(id)
            .await?
            .ok_or_else(|| HandReceiptError::TransferNotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        user_id: i64,
        status: Option<Vec<TransferStatus>>,
        direction: TransferDirection,
    ) -> Result<Vec<Transfer>, HandReceiptError> {
        self.repository.list_transfers(user_id, status, direction).await
    }

    /// Requires the actor be `fromUserId` for `Approve`/`Reject` or
    /// `toUserId` for `Cancel`; the repository enforces the rest of the
    /// atomic transition (ownership re-check, QR deactivation, ledger
    /// append) in one transaction.
    pub async fn resolve(
        &self,
        transfer_id: i64,
        decision: ResolveDecision,
        actor_user_id: i64,
        notes: Option<String>,
    ) -> Result<Transfer, HandReceiptError> {
        let transfer = self.get_by_id(transfer_id).await?;
        if transfer.status != TransferStatus::Requested {
            return Err(HandReceiptError::TransferNotPending);
        }

        let authorized = match decision {
            ResolveDecision::Approved | ResolveDecision::Rejected => {
                actor_user_id == transfer.from_user_id
            }
            ResolveDecision::Cancelled => actor_user_id == transfer.to_user_id,
        };
        if !authorized {
            return Err(HandReceiptError::Unauthorized(
                "actor is not a party to this transfer".to_string(),
            ));
        }

        let (resolved, _events) = self
            .repository
            .resolve_transfer(transfer_id, decision, actor_user_id, notes)
            .await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::repository::{CreatePropertyInput, CreateUserInput};
    use crate::types::{PropertyStatus, Role};

    async fn setup() -> (TransferService, Arc<MemoryRepository>, i64, i64) {
        let repo = Arc::new(MemoryRepository::new());
        let alice = repo
            .create_user(CreateUserInput {
                username: "alice".to_string(),
                password_hash: "hash".to_string(),
                name: "Alice".to_string(),
                rank: "SGT".to_string(),
                unit: "HHC".to_string(),
                role: Role::NCO,
            })
            .await
            .unwrap();
        let bob = repo
            .create_user(CreateUserInput {
                username: "bob".to_string(),
                password_hash: "hash".to_string(),
                name: "Bob".to_string(),
                rank: "SPC".to_string(),
                unit: "HHC".to_string(),
                role: Role::Soldier,
            })
            .await
            .unwrap();
        let qr_engine = Arc::new(QrEngine::new(repo.clone()));
        let service = TransferService::new(repo.clone(), qr_engine);
        (service, repo, alice.id, bob.id)
    }

    #[tokio::test]
    async fn manual_push_from_holder() {
        let (service, repo, alice, bob) = setup().await;
        let (property, _) = repo
            .create_property(
                CreatePropertyInput {
                    name: "M4 Carbine".to_string(),
                    serial_number: "M4-1".to_string(),
                    nsn: None,
                    lin: None,
                    description: None,
                    current_status: PropertyStatus::Operational,
                    assigned_to_user_id: Some(alice),
                    property_model_id: None,
                },
                alice,
            )
            .await
            .unwrap();

        let transfer = service
            .request_manual(property.id, bob, alice)
            .await
            .unwrap();
        assert_eq!(transfer.from_user_id, alice);
        assert_eq!(transfer.to_user_id, bob);
    }

    #[tokio::test]
    async fn resolve_requires_correct_party() {
        let (service, repo, alice, bob) = setup().await;
        let (property, _) = repo
            .create_property(
                CreatePropertyInput {
                    name: "Radio".to_string(),
                    serial_number: "RAD-1".to_string(),
                    nsn: None,
                    lin: None,
                    description: None,
                    current_status: PropertyStatus::Operational,
                    assigned_to_user_id: Some(alice),
                    property_model_id: None,
                },
                alice,
            )
            .await
            .unwrap();
        let transfer = service.request_manual(property.id, bob, alice).await.unwrap();

        let err = service
            .resolve(transfer.id, ResolveDecision::Approved, bob, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");

        let resolved = service
            .resolve(transfer.id, ResolveDecision::Approved, alice, None)
            .await
            .unwrap();
        assert_eq!(resolved.status, TransferStatus::Approved);
    }
}
