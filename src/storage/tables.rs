use redb::TableDefinition;

/// Services: service_id -> Service (bincode)
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Queue tokens: token_id -> Token (bincode)
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Secondary index: service_id -> Vec<token_id> (for per-service queue scans)
pub const SERVICE_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_tokens");

/// Secondary index: user_id -> Vec<token_id> (for duplicate-token and limit checks)
pub const USER_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_tokens");

/// Presence checks: token_id -> Vec<PresenceCheck> (bincode, append-only)
pub const PRESENCE_CHECKS: TableDefinition<&str, &[u8]> = TableDefinition::new("presence_checks");
