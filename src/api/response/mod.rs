pub mod accounting;
pub mod consumption_record;
pub mod metering_point;
