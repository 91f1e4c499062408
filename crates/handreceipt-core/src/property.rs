//! Property Service (C4): item creation with serial-number uniqueness,
//! ownership assignment, and maintenance status.

use crate::error::HandReceiptError;
use crate::repository::{CreatePropertyInput, PropertyFilters, Repository};
use crate::types::{Property, PropertyStatus};
use std::sync::Arc;

pub struct PropertyService {
    repository: Arc<dyn Repository>,
}

impl PropertyService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Validates `name`/`serialNumber` non-empty and inserts, emitting
    /// `ITEM_CREATE` in the same transaction.
    pub async fn create(
        &self,
        input: CreatePropertyInput,
        actor_user_id: i64,
    ) -> Result<Property, HandReceiptError> {
        if input.name.trim().is_empty() {
            return Err(HandReceiptError::MissingField("name".to_string()));
        }
        if input.serial_number.trim().is_empty() {
            return Err(HandReceiptError::MissingField("serialNumber".to_string()));
        }

        let (property, _event) = self.repository.create_property(input, actor_user_id).await?;
        Ok(property)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Property, HandReceiptError> {
        self.repository
            .get_property_by_id(id)
            .await?
            .ok_or_else(|| HandReceiptError::PropertyNotFound(id.to_string()))
    }

    pub async fn get_by_serial(&self, serial: &str) -> Result<Property, HandReceiptError> {
        self.repository
            .get_property_by_serial(serial)
            .await?
            .ok_or_else(|| HandReceiptError::PropertyNotFound(serial.to_string()))
    }

    /// Free-form status change, except `Lost`, which is irreversible
    /// without an admin `CORRECTION` event. Emits `STATUS_CHANGE`.
    pub async fn update_status(
        &self,
        id: i64,
        new_status: PropertyStatus,
        actor_user_id: i64,
        note: Option<String>,
    ) -> Result<Property, HandReceiptError> {
        let current = self.get_by_id(id).await?;
        if matches!(current.current_status, PropertyStatus::Lost) {
            return Err(HandReceiptError::InvalidInput(
                "a Lost property can only be corrected by an admin CORRECTION event".to_string(),
            ));
        }

        let (property, _event) = self
            .repository
            .update_property_status(id, new_status, actor_user_id, note)
            .await?;
        Ok(property)
    }

    pub async fn list(&self, filters: PropertyFilters) -> Result<Vec<Property>, HandReceiptError> {
        self.repository.list_properties(filters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::repository::CreateUserInput;
    use crate::types::Role;

    async fn service_with_owner() -> (PropertyService, i64) {
        let repo = Arc::new(MemoryRepository::new());
        let owner = repo
            .create_user(CreateUserInput {
                username: "owner".to_string(),
                password_hash: "hash".to_string(),
                name: "Owner".to_string(),
                rank: "SSG".to_string(),
                unit: "HHC".to_string(),
                role: Role::NCO,
            })
            .await
            .unwrap();
        (PropertyService::new(repo), owner.id)
    }

    #[tokio::test]
    async fn rejects_empty_name() {
        let (service, owner) = service_with_owner().await;
        let err = service
            .create(
                CreatePropertyInput {
                    name: "   ".to_string(),
                    serial_number: "SN-1".to_string(),
                    nsn: None,
                    lin: None,
                    description: None,
                    current_status: PropertyStatus::Operational,
                    assigned_to_user_id: Some(owner),
                    property_model_id: None,
                },
                owner,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MissingField");
    }

    #[tokio::test]
    async fn lost_property_refuses_further_status_changes() {
        let (service, owner) = service_with_owner().await;
        let property = service
            .create(
                CreatePropertyInput {
                    name: "Radio".to_string(),
                    serial_number: "SN-2".to_string(),
                    nsn: None,
                    lin: None,
                    description: None,
                    current_status: PropertyStatus::Operational,
                    assigned_to_user_id: Some(owner),
                    property_model_id: None,
                },
                owner,
            )
            .await
            .unwrap();

        service
            .update_status(property.id, PropertyStatus::Lost, owner, None)
            .await
            .unwrap();

        let err = service
            .update_status(property.id, PropertyStatus::Operational, owner, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
