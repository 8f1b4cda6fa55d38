//! # PatchTableSheet
//!
//! Replaces a named game-data table with new CSV text. Operator-only: the
//! signer must pass [`check_permission`].

use async_trait::async_trait;
use tracing::info;

use strata_protocol::action::{Action, ActionContext, ActionError};
use strata_protocol::address::Address;
use strata_protocol::evaluator::StateDelta;
use strata_protocol::value::Value;

use crate::addresses;
use crate::admin::check_permission;

pub const TYPE_TAG: &str = "patch_table_sheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTableSheet {
    pub table_name: String,
    pub table_csv: String,
}

impl PatchTableSheet {
    pub fn new(table_name: impl Into<String>, table_csv: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            table_csv: table_csv.into(),
        }
    }

    pub fn load(value: &Value) -> Result<Box<dyn Action>, ActionError> {
        let map = value
            .as_map()
            .ok_or_else(|| ActionError::invalid(TYPE_TAG, "expected a map"))?;
        let text = |key: &str| {
            map.get_text_key(key)
                .and_then(Value::as_text)
                .ok_or_else(|| ActionError::invalid(TYPE_TAG, format!("missing text `{}`", key)))
        };
        let table_name = text("table_name")?;
        if table_name.is_empty() {
            return Err(ActionError::invalid(TYPE_TAG, "empty table name"));
        }
        let table_csv = text("table_csv")?;
        Ok(Box::new(Self::new(table_name, table_csv)))
    }
}

#[async_trait]
impl Action for PatchTableSheet {
    fn type_tag(&self) -> &str {
        TYPE_TAG
    }

    fn plain_value(&self) -> Value {
        Value::map([
            ("table_csv", self.table_csv.as_str()),
            ("table_name", self.table_name.as_str()),
        ])
    }

    fn declared_addresses(&self, _signer: &Address) -> Vec<Address> {
        vec![addresses::admin_state(), addresses::table_sheet(&self.table_name)]
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        check_permission(ctx).await?;

        info!(
            table = %self.table_name,
            bytes = self.table_csv.len(),
            signer = %ctx.signer,
            "table sheet patched"
        );
        let mut delta = StateDelta::new();
        delta.set(addresses::table_sheet(&self.table_name), self.table_csv.as_str());
        Ok(delta)
    }
}
