pub type Endpoint = str;

pub const BASE_URL: &str = "https://smartmeter.netz-noe.at/orchestration";

pub const LOGIN: &Endpoint = "/Authentication/Login";
pub const USER_BASIC_INFO: &Endpoint = "/User/GetBasicInfo";
pub const ACCOUNTING_DETAILS: &Endpoint = "/User/GetAccountIdByBussinespartnerId";
pub const METER_DETAILS: &Endpoint = "/User/GetMeteringPointByAccountId";
pub const CONSUMPTION_DAY: &Endpoint = "/ConsumptionRecord/Day";
pub const CONSUMPTION_MONTH: &Endpoint = "/ConsumptionRecord/Month";
pub const CONSUMPTION_YEAR: &Endpoint = "/ConsumptionRecord/Year";
