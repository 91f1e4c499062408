//! QR Engine (C3): canonical-JSON payload, SHA-256 hash binding,
//! verification, and lifecycle (active / damaged / deactivated).

use crate::canonical::canonicalize;
use crate::error::HandReceiptError;
use crate::repository::{NewQrCode, Repository};
use crate::types::{PropertyStatus, VerificationResult};
use chrono::Utc;
use image::{ImageBuffer, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::Arc;

/// Bit-exact QR payload schema from spec §4.3/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    #[serde(rename = "itemName")]
    pub item_name: String,
    pub category: String,
    #[serde(rename = "currentHolderId")]
    pub current_holder_id: String,
    pub timestamp: String,
    #[serde(rename = "qrHash")]
    pub qr_hash: String,
}

/// `qrHash = SHA-256(canonical(payload_without_qrHash))`, lowercase hex.
pub fn payload_hash(payload: &QrPayload) -> String {
    let mut without_hash = payload.clone();
    without_hash.qr_hash = String::new();
    let value = serde_json::to_value(&without_hash).expect("QrPayload always serializes");
    let mut map = value.as_object().expect("QrPayload serializes to an object").clone();
    map.remove("qrHash");
    let canonical = canonicalize(&Value::Object(map));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

pub struct QrEngine {
    repository: Arc<dyn Repository>,
}

impl QrEngine {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Loads the property, composes the payload, computes its hash, and —
    /// in one repository transaction — deactivates the current active QR
    /// (emitting `QR_DEACTIVATED`), inserts the new row, and emits
    /// `QR_GENERATED`.
    pub async fn generate(
        &self,
        property_id: i64,
        actor_user_id: i64,
    ) -> Result<(QrPayload, Vec<u8>), HandReceiptError> {
        let property = self
            .repository
            .get_property_by_id(property_id)
            .await?
            .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;

        let holder_id = property
            .assigned_to_user_id
            .ok_or_else(|| HandReceiptError::InvalidInput(
                "cannot generate a QR code for an unassigned property".to_string(),
            ))?;

        let mut payload = QrPayload {
            kind: "handreceipt_property".to_string(),
            item_id: property.id.to_string(),
            serial_number: property.serial_number.clone(),
            item_name: property.name.clone(),
            category: property
                .description
                .clone()
                .unwrap_or_else(|| "uncategorized".to_string()),
            current_holder_id: holder_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            qr_hash: String::new(),
        };
        payload.qr_hash = payload_hash(&payload);

        let payload_json = serde_json::to_value(&payload).expect("QrPayload always serializes");
        let (qr, _events) = self
            .repository
            .generate_qr_code(NewQrCode {
                property_id,
                qr_code_hash: payload.qr_hash.clone(),
                payload_json,
                generated_by_user_id: actor_user_id,
                generated_at: Utc::now(),
            })
            .await?;

        let png = render_png(&serde_json::to_string(&payload).expect("payload serializes"))?;
        let _ = qr.id;
        Ok((payload, png))
    }

    /// Recomputes the hash, looks up the stored QR, and checks activity,
    /// ownership currency, and the property's status, per spec §4.3.
    pub async fn verify(&self, payload: &QrPayload) -> Result<VerificationResult, HandReceiptError> {
        let expected_hash = payload_hash(payload);
        if expected_hash != payload.qr_hash {
            return Ok(VerificationResult::InvalidHash);
        }

        let qr = match self.repository.get_qr_by_hash(&payload.qr_hash).await? {
            Some(qr) => qr,
            None => return Ok(VerificationResult::NotFound),
        };

        let property = match self.repository.get_property_by_id(qr.inventory_item_id).await? {
            Some(property) => property,
            None => return Ok(VerificationResult::NotFound),
        };
        if matches!(property.current_status, PropertyStatus::Lost) {
            return Ok(VerificationResult::PropertyLost);
        }

        let claimed_holder: i64 = payload
            .current_holder_id
            .parse()
            .map_err(|_| HandReceiptError::InvalidInput("currentHolderId is not an integer".to_string()))?;
        if property.assigned_to_user_id != Some(claimed_holder) {
            return Ok(VerificationResult::Outdated);
        }

        if !qr.is_active {
            return Ok(VerificationResult::Deactivated);
        }

        Ok(VerificationResult::Valid)
    }

    pub async fn report_damaged(
        &self,
        qr_id: i64,
        actor_user_id: i64,
        reason: &str,
    ) -> Result<(), HandReceiptError> {
        self.repository
            .deactivate_qr_code(qr_id, actor_user_id, reason)
            .await?;
        Ok(())
    }
}

/// Renders `text` as a PNG at error-correction level M, per spec §6.
fn render_png(text: &str) -> Result<Vec<u8>, HandReceiptError> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)
        .map_err(|e| HandReceiptError::InvalidInput(format!("QR encoding failed: {e}")))?;
    let image: ImageBuffer<Luma<u8>, Vec<u8>> = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(8, 8)
        .build();

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .map_err(|e| HandReceiptError::InvalidInput(format!("PNG encoding failed: {e}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_excludes_itself_and_is_reproducible() {
        let mut payload = QrPayload {
            kind: "handreceipt_property".to_string(),
            item_id: "1".to_string(),
            serial_number: "SN-1".to_string(),
            item_name: "M4 Carbine".to_string(),
            category: "weapon".to_string(),
            current_holder_id: "7".to_string(),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            qr_hash: String::new(),
        };
        let hash_a = payload_hash(&payload);
        payload.qr_hash = "ffff".to_string();
        let hash_b = payload_hash(&payload);
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
    }
}
