/// Database row types that are not documents.
/// Kept apart from petpal-types so the DB layer stays independent.

pub struct CredentialRow {
    pub uid: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}
