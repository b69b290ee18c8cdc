use serde::Deserialize;

/// First element of the meter payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterDetails {
    pub metering_point_id: String,
}

#[cfg(test)]
mod test {
    use super::MeterDetails;

    #[test]
    fn deserializes_provider_payload() {
        let input = r#"[{"meteringPointId": "AT0020000000000000000000012345678"}]"#;
        let details: Vec<MeterDetails> = serde_json::from_str(input).unwrap();
        assert_eq!(
            "AT0020000000000000000000012345678",
            details[0].metering_point_id
        );
    }
}
