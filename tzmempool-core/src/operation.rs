//! Operation data model.
//!
//! Operation kinds form a closed enumeration. Each kind knows the tag used
//! in configuration and node payloads, the collection it is served from by
//! the indexer, the `type` the indexer reports for it, and the table it is
//! persisted into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Every operation kind the tracker knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Activation,
    Ballot,
    Delegation,
    DoubleBaking,
    DoubleEndorsing,
    DoublePreendorsing,
    DrainDelegate,
    Endorsement,
    IncreasePaidStorage,
    NonceRevelation,
    Origination,
    Preendorsement,
    Proposals,
    RegisterConstant,
    Reveal,
    SetDepositsLimit,
    Transaction,
    UpdateConsensusKey,
    VdfRevelation,
}

impl OperationKind {
    /// All kinds, in tag order.
    pub const ALL: [OperationKind; 19] = [
        Self::Activation,
        Self::Ballot,
        Self::Delegation,
        Self::DoubleBaking,
        Self::DoubleEndorsing,
        Self::DoublePreendorsing,
        Self::DrainDelegate,
        Self::Endorsement,
        Self::IncreasePaidStorage,
        Self::NonceRevelation,
        Self::Origination,
        Self::Preendorsement,
        Self::Proposals,
        Self::RegisterConstant,
        Self::Reveal,
        Self::SetDepositsLimit,
        Self::Transaction,
        Self::UpdateConsensusKey,
        Self::VdfRevelation,
    ];

    /// Tag used in configuration, in node payloads and in the `kind` column.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Activation => "activate_account",
            Self::Ballot => "ballot",
            Self::Delegation => "delegation",
            Self::DoubleBaking => "double_baking_evidence",
            Self::DoubleEndorsing => "double_endorsement_evidence",
            Self::DoublePreendorsing => "double_preendorsement_evidence",
            Self::DrainDelegate => "drain_delegate",
            Self::Endorsement => "endorsement",
            Self::IncreasePaidStorage => "increase_paid_storage",
            Self::NonceRevelation => "seed_nonce_revelation",
            Self::Origination => "origination",
            Self::Preendorsement => "preendorsement",
            Self::Proposals => "proposals",
            Self::RegisterConstant => "register_global_constant",
            Self::Reveal => "reveal",
            Self::SetDepositsLimit => "set_deposits_limit",
            Self::Transaction => "transaction",
            Self::UpdateConsensusKey => "update_consensus_key",
            Self::VdfRevelation => "vdf_revelation",
        }
    }

    /// Indexer collection path segment (`/v1/operations/{collection}`).
    pub fn collection(self) -> &'static str {
        match self {
            Self::Activation => "activations",
            Self::Ballot => "ballots",
            Self::Delegation => "delegations",
            Self::DoubleBaking => "double_baking",
            Self::DoubleEndorsing => "double_endorsing",
            Self::DoublePreendorsing => "double_preendorsing",
            Self::DrainDelegate => "drain_delegate",
            Self::Endorsement => "endorsements",
            Self::IncreasePaidStorage => "increase_paid_storage",
            Self::NonceRevelation => "nonce_revelations",
            Self::Origination => "originations",
            Self::Preendorsement => "preendorsements",
            Self::Proposals => "proposals",
            Self::RegisterConstant => "register_constants",
            Self::Reveal => "reveals",
            Self::SetDepositsLimit => "set_deposits_limits",
            Self::Transaction => "transactions",
            Self::UpdateConsensusKey => "update_consensus_key",
            Self::VdfRevelation => "vdf_revelation",
        }
    }

    /// `type` field of this kind in indexer payloads and subscriptions.
    pub fn indexer_type(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Ballot => "ballot",
            Self::Delegation => "delegation",
            Self::DoubleBaking => "double_baking",
            Self::DoubleEndorsing => "double_endorsing",
            Self::DoublePreendorsing => "double_preendorsing",
            Self::DrainDelegate => "drain_delegate",
            Self::Endorsement => "endorsement",
            Self::IncreasePaidStorage => "increase_paid_storage",
            Self::NonceRevelation => "nonce_revelation",
            Self::Origination => "origination",
            Self::Preendorsement => "preendorsement",
            Self::Proposals => "proposal",
            Self::RegisterConstant => "register_constant",
            Self::Reveal => "reveal",
            Self::SetDepositsLimit => "set_deposits_limit",
            Self::Transaction => "transaction",
            Self::UpdateConsensusKey => "update_consensus_key",
            Self::VdfRevelation => "vdf_revelation",
        }
    }

    /// Persistence table.
    pub fn table(self) -> &'static str {
        self.collection()
    }

    /// Resolve a kind from an indexer `type` value.
    pub fn from_indexer_type(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.indexer_type() == value)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Protocol renames keep the old record shape.
        let canonical = match s {
            "endorsement_with_slot" | "attestation" | "attestation_with_dal" => "endorsement",
            "preattestation" => "preendorsement",
            "double_attestation_evidence" => "double_endorsement_evidence",
            "double_preattestation_evidence" => "double_preendorsement_evidence",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|k| k.tag() == canonical)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

/// Lifecycle status of an operation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Applied,
    BranchDelayed,
    BranchRefused,
    Refused,
    InChain,
    Expired,
}

impl OperationStatus {
    /// The four buckets a mempool snapshot is split into.
    pub const MEMPOOL_BUCKETS: [OperationStatus; 4] = [
        Self::Applied,
        Self::BranchDelayed,
        Self::BranchRefused,
        Self::Refused,
    ];

    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::BranchDelayed => "branch_delayed",
            Self::BranchRefused => "branch_refused",
            Self::Refused => "refused",
            Self::InChain => "in_chain",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Self::Applied),
            "branch_delayed" => Ok(Self::BranchDelayed),
            "branch_refused" => Ok(Self::BranchRefused),
            "refused" => Ok(Self::Refused),
            "in_chain" => Ok(Self::InChain),
            "expired" => Ok(Self::Expired),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// One content of a mempool operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContent {
    pub kind: OperationKind,
    /// Kind-specific fields, as received
    pub fields: Map<String, Value>,
}

impl OperationContent {
    /// String field, if present.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Level carried by the content itself (endorsements and friends).
    pub fn level(&self) -> Option<u64> {
        self.fields.get("level").and_then(Value::as_u64)
    }

    /// Source account of the content.
    pub fn source(&self) -> Option<&str> {
        self.str_field("source")
            .or_else(|| self.str_field("delegate"))
            .or_else(|| self.str_field("pkh"))
    }

    /// Accounts mentioned by this content.
    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        ["source", "destination", "delegate", "pkh"]
            .into_iter()
            .filter_map(|name| self.str_field(name))
    }
}

/// A pending operation observed in a node's mempool.
#[derive(Debug, Clone, PartialEq)]
pub struct MempoolOperation {
    pub hash: String,
    pub branch: String,
    /// Bucket the operation was found in
    pub status: OperationStatus,
    pub signature: Option<String>,
    pub contents: Vec<OperationContent>,
    /// Node errors, only for non-applied buckets
    pub errors: Option<Value>,
    /// Node head level when the operation was observed
    pub level: u64,
}

/// An operation confirmed on chain, as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedOperation {
    /// Indexer row id, used as pagination cursor
    pub id: u64,
    pub hash: String,
    pub level: u64,
    /// Hash of the block containing the operation
    pub block: String,
    pub kind: OperationKind,
    /// Sender or baker account, when the indexer reports one
    pub sender: Option<String>,
    /// Target account, when the indexer reports one
    pub target: Option<String>,
}
