use serde::Deserialize;

/// First element of the accounting payload. Besides the account id it
/// carries the four eligibility sub-flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingDetails {
    pub account_id: String,
    pub has_smart_meter: bool,
    pub has_electricity: bool,
    pub has_communicative: bool,
    pub has_active: bool,
}

impl AccountingDetails {
    /// The account is eligible for programmatic smart-meter access only if
    /// all four sub-flags are set.
    pub fn supports_api(&self) -> bool {
        self.has_smart_meter && self.has_electricity && self.has_communicative && self.has_active
    }
}
