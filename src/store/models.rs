/// Database models for the audit ledger.
///
/// These structs map directly to PostgreSQL tables and are used for both
/// reading and writing via sqlx. Events are append-only: after capture the
/// only columns that ever change are status / batch assignment.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Business event catalog. Producing ERP modules pick one of these when
/// calling capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Financial
    InvoiceCreated,
    InvoiceUpdated,
    InvoiceDeleted,
    PaymentCreated,
    PaymentProcessed,
    PaymentFailed,
    ExpenseCreated,
    ExpenseApproved,
    ExpenseRejected,
    // Sales
    SaleCreated,
    SaleUpdated,
    ClientCreated,
    ClientUpdated,
    ContractCreated,
    ContractUpdated,
    // HR
    EmployeeCreated,
    EmployeeUpdated,
    PayrollProcessed,
    LeaveApproved,
    LeaveRejected,
    // System
    UserLogin,
    UserLogout,
    PermissionGranted,
    PermissionRevoked,
    DataExport,
    DataImport,
    SystemBackup,
    SystemRestore,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InvoiceCreated => "invoice_created",
            EventType::InvoiceUpdated => "invoice_updated",
            EventType::InvoiceDeleted => "invoice_deleted",
            EventType::PaymentCreated => "payment_created",
            EventType::PaymentProcessed => "payment_processed",
            EventType::PaymentFailed => "payment_failed",
            EventType::ExpenseCreated => "expense_created",
            EventType::ExpenseApproved => "expense_approved",
            EventType::ExpenseRejected => "expense_rejected",
            EventType::SaleCreated => "sale_created",
            EventType::SaleUpdated => "sale_updated",
            EventType::ClientCreated => "client_created",
            EventType::ClientUpdated => "client_updated",
            EventType::ContractCreated => "contract_created",
            EventType::ContractUpdated => "contract_updated",
            EventType::EmployeeCreated => "employee_created",
            EventType::EmployeeUpdated => "employee_updated",
            EventType::PayrollProcessed => "payroll_processed",
            EventType::LeaveApproved => "leave_approved",
            EventType::LeaveRejected => "leave_rejected",
            EventType::UserLogin => "user_login",
            EventType::UserLogout => "user_logout",
            EventType::PermissionGranted => "permission_granted",
            EventType::PermissionRevoked => "permission_revoked",
            EventType::DataExport => "data_export",
            EventType::DataImport => "data_import",
            EventType::SystemBackup => "system_backup",
            EventType::SystemRestore => "system_restore",
        }
    }
}

/// Producing ERP module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_module", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Finance,
    Sales,
    Hr,
    Inventory,
    Purchasing,
    Scheduling,
    Analytics,
    System,
    Wallet,
    AuditTrail,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Finance => "finance",
            Module::Sales => "sales",
            Module::Hr => "hr",
            Module::Inventory => "inventory",
            Module::Purchasing => "purchasing",
            Module::Scheduling => "scheduling",
            Module::Analytics => "analytics",
            Module::System => "system",
            Module::Wallet => "wallet",
            Module::AuditTrail => "audit_trail",
        }
    }
}

impl std::str::FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "finance" => Ok(Module::Finance),
            "sales" => Ok(Module::Sales),
            "hr" => Ok(Module::Hr),
            "inventory" => Ok(Module::Inventory),
            "purchasing" => Ok(Module::Purchasing),
            "scheduling" => Ok(Module::Scheduling),
            "analytics" => Ok(Module::Analytics),
            "system" => Ok(Module::System),
            "wallet" => Ok(Module::Wallet),
            "audit_trail" => Ok(Module::AuditTrail),
            other => Err(format!("unknown module: {other}")),
        }
    }
}

/// Event lifecycle. `Pending` and `Failed` are the only states the batch
/// assembler may claim from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Batched,
    Anchored,
    Failed,
}

/// A captured audit event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub module: Module,
    /// Opaque actor identifier (user id, wallet address, ...).
    pub actor_id: Option<String>,
    pub subject_type: String,
    pub subject_id: String,
    /// Event data payload (JSON object).
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    /// 32-byte digest of the canonical event content.
    pub event_hash: Vec<u8>,
    pub status: EventStatus,
    pub batch_id: Option<Uuid>,
    /// Leaf position within the batch; fixes Merkle leaf order.
    pub batch_position: Option<i32>,
    /// Content-addressed storage reference, when the payload is also
    /// published off-chain.
    pub payload_cid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Stored digest as a fixed-size array.
    pub fn hash_bytes(&self) -> Option<[u8; 32]> {
        self.event_hash.as_slice().try_into().ok()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.event_hash)
    }
}

/// Batch lifecycle. `Stuck` is a submitted batch past the maximum
/// confirmation wait, held for operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Open,
    Sealed,
    Submitted,
    Confirmed,
    Failed,
    Stuck,
}

/// A sealed group of events anchored as one unit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MerkleBatch {
    pub id: Uuid,
    /// 32-byte Merkle root over the member event hashes in leaf order.
    pub root_hash: Vec<u8>,
    pub leaf_count: i32,
    pub status: BatchStatus,
    /// External reference once submitted (transaction hash).
    pub anchor_ref: Option<String>,
    /// Content-addressed reference to the full batch payload, if published.
    pub payload_cid: Option<String>,
    pub retry_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl MerkleBatch {
    pub fn root_bytes(&self) -> Option<[u8; 32]> {
        self.root_hash.as_slice().try_into().ok()
    }

    pub fn root_hex(&self) -> String {
        hex::encode(&self.root_hash)
    }
}

/// On-chain anchor record for a batch.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub network: String,
    /// Transaction hash on the anchor network.
    pub reference: String,
    pub block_number: Option<i64>,
    pub gas_used: Option<i64>,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregate status counts for the stats read API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total: i64,
    pub pending: i64,
    pub batched: i64,
    pub anchored: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: i64,
    pub sealed: i64,
    pub submitted: i64,
    pub confirmed: i64,
    pub failed: i64,
    pub stuck: i64,
}
