use serde::{Deserialize, Serialize};

use crate::storage::types::QuantityAdjustment;

/// Signed change applied to an item's quantity.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    #[serde(alias = "delta")]
    pub quantity: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdjustResponse {
    pub success: bool,
    pub item_id: String,
    pub old_quantity: f64,
    pub new_quantity: f64,
}

impl From<QuantityAdjustment> for AdjustResponse {
    fn from(adj: QuantityAdjustment) -> Self {
        Self {
            success: true,
            item_id: adj.item_id,
            old_quantity: adj.old_quantity,
            new_quantity: adj.new_quantity,
        }
    }
}
