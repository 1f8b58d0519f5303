use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use petpal_db::{BlobStore, WriteBatch};
use petpal_types::api::NewPet;
use petpal_types::models::Pet;

use crate::error::{SocialError, SocialResult};
use crate::mutations::MutationCoordinator;
use crate::store::{
    Backend, PETS, check_upload, child_path, collection_path, decode_entries, discard_upload_on_error, doc_path,
    read_doc,
};

pub type PetSnapshot = BTreeMap<String, Pet>;

pub const MIN_PET_NAME_CHARS: usize = 2;
pub const MIN_DESCRIPTION_CHARS: usize = 10;

pub fn decode_pets(value: Option<Value>) -> PetSnapshot {
    decode_entries(value, "pet", |pet: &mut Pet, id| pet.id = id.to_string())
}

impl Backend {
    pub async fn pets(&self) -> SocialResult<PetSnapshot> {
        Ok(decode_pets(self.read_once(&collection_path(PETS)?).await?))
    }
}

/// `owner`'s pets ordered by name.
pub fn pets_of(pets: &PetSnapshot, owner: &str) -> Vec<Pet> {
    let mut owned: Vec<Pet> = pets.values().filter(|p| p.owner_id == owner).cloned().collect();
    owned.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    owned
}

pub fn validate_pet(pet: &NewPet) -> SocialResult<()> {
    let invalid = |msg: &str| Err(SocialError::Validation(msg.to_string()));

    if pet.name.trim().chars().count() < MIN_PET_NAME_CHARS {
        return invalid("pet name must be at least 2 characters");
    }
    if pet.last_fed.trim().is_empty() {
        return invalid("last fed time is required");
    }
    for (label, value) in [("height", pet.height), ("weight", pet.weight), ("length", pet.length)] {
        if !value.is_finite() || value < 0.0 {
            return Err(SocialError::Validation(format!("{} cannot be negative", label)));
        }
    }
    if pet.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
        return invalid("description must be at least 10 characters");
    }
    if pet.health_status.trim().is_empty() {
        return invalid("health status is required");
    }
    Ok(())
}

impl MutationCoordinator {
    pub async fn add_pet(&self, owner: &str, new: NewPet) -> SocialResult<Pet> {
        validate_pet(&new)?;
        let id = self.backend().generate_id(&collection_path(PETS)?);

        let pet = Pet {
            id,
            owner_id: owner.to_string(),
            name: new.name.trim().to_string(),
            species: new.species,
            age: new.age,
            last_fed: new.last_fed.trim().to_string(),
            height: new.height,
            weight: new.weight,
            length: new.length,
            description: new.description.trim().to_string(),
            health_status: new.health_status.trim().to_string(),
            image_url: None,
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        batch.set_json(doc_path(PETS, &pet.id)?.to_string(), &pet)?;
        self.backend().write_atomic(batch).await?;

        info!("{} added pet {} ({})", owner, pet.name, pet.id);
        Ok(pet)
    }

    /// Upload a photo for one of `owner`'s pets and link it from the pet.
    pub async fn attach_pet_image(
        &self,
        blobs: &BlobStore,
        owner: &str,
        pet_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> SocialResult<Pet> {
        let file_name = check_upload(file_name, bytes)?;
        let current = self.owned_pet(owner, pet_id).await?;

        let blob = blobs.upload(&format!("pets/{}/{}", pet_id, file_name), bytes).await?;

        let pet_path = doc_path(PETS, pet_id)?;
        let url_path = child_path(&pet_path, &["imageUrl"])?;
        let url = blob.url.clone();
        let owner = owner.to_string();
        let pet_id = pet_id.to_string();

        let linked = self
            .backend()
            .transact(move |tx| {
                // Re-checked here in case the pet was deleted during the upload
                let mut pet: Pet = read_doc(tx, &pet_path)?
                    .ok_or_else(|| SocialError::NotFound(format!("pet {}", pet_id)))?;
                pet.id = pet_id;
                ensure_owner(&pet, &owner)?;

                let mut batch = WriteBatch::new();
                batch.set(url_path.to_string(), Value::String(url.clone()));
                let previous = pet.image_url.replace(url);
                Ok((batch, (pet, previous)))
            })
            .await;
        let (pet, previous) =
            discard_upload_on_error(blobs, &blob.path, current.image_url.as_deref(), linked).await?;

        if let Some(old) = previous.as_deref().and_then(|u| blobs.path_of(u)) {
            if old != blob.path {
                remove_blob(blobs, old).await;
            }
        }
        Ok(pet)
    }

    /// Delete one of `owner`'s pets along with its photo.
    pub async fn delete_pet(&self, blobs: &BlobStore, owner: &str, pet_id: &str) -> SocialResult<()> {
        let pet_path = doc_path(PETS, pet_id)?;
        let owner = owner.to_string();
        let id = pet_id.to_string();

        let pet = self
            .backend()
            .transact(move |tx| {
                let mut pet: Pet = read_doc(tx, &pet_path)?
                    .ok_or_else(|| SocialError::NotFound(format!("pet {}", id)))?;
                pet.id = id;
                ensure_owner(&pet, &owner)?;

                let mut batch = WriteBatch::new();
                batch.delete(pet_path.to_string());
                Ok((batch, pet))
            })
            .await?;

        if let Some(path) = pet.image_url.as_deref().and_then(|u| blobs.path_of(u)) {
            remove_blob(blobs, path).await;
        }
        info!("Deleted pet {} ({})", pet.name, pet.id);
        Ok(())
    }

    async fn owned_pet(&self, owner: &str, pet_id: &str) -> SocialResult<Pet> {
        let mut pet: Pet = self
            .backend()
            .load(PETS, pet_id)
            .await?
            .ok_or_else(|| SocialError::NotFound(format!("pet {}", pet_id)))?;
        pet.id = pet_id.to_string();
        ensure_owner(&pet, owner)?;
        Ok(pet)
    }
}

fn ensure_owner(pet: &Pet, uid: &str) -> SocialResult<()> {
    if pet.owner_id != uid {
        return Err(SocialError::Forbidden(format!("pet {} belongs to someone else", pet.id)));
    }
    Ok(())
}

/// The record is already gone, so a leftover file is only worth a warning.
async fn remove_blob(blobs: &BlobStore, path: &str) {
    if let Err(e) = blobs.delete(path).await {
        warn!("Failed to remove blob {}: {}", path, e);
    }
}
