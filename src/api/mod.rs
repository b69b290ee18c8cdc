pub mod endpoint;
pub mod error;
pub mod response;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use http::StatusCode;
use reqwest::header;
use serde_json::Value;

use crate::model::ConsumptionSeries;
use crate::session::{SessionHandle, SessionStore, SESSION_FILE};
use endpoint::Endpoint;
use error::Error;
use response::accounting::AccountingDetails;
use response::consumption_record::ConsumptionRecords;
use response::metering_point::MeterDetails;

/// Ceiling for every provider interaction.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `context` query parameter expected by the user/accounting/meter endpoints.
const CONTEXT: &str = "2";

/// Client for the provider's private smart-meter API. Holds the credentials,
/// at most one live session, and the lazily discovered account identifiers.
#[derive(Debug)]
pub struct Smartmeter {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    store: SessionStore,
    session: Option<SessionHandle>,
    supports_api: bool,
    account_id: Option<String>,
    metering_point_id: Option<String>,
}

impl Smartmeter {
    pub fn new(username: String, password: String) -> Result<Smartmeter, Error> {
        Smartmeter::with_base_url(
            String::from(endpoint::BASE_URL),
            PathBuf::from(SESSION_FILE),
            username,
            password,
        )
    }

    /// Points the client at an alternate API origin and session file.
    pub fn with_base_url(
        base_url: String,
        session_file: PathBuf,
        username: String,
        password: String,
    ) -> Result<Smartmeter, Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .or(Err(Error::InternalError))?;

        Ok(Smartmeter {
            base_url,
            username,
            password,
            client,
            store: SessionStore::new(session_file),
            session: None,
            supports_api: false,
            account_id: None,
            metering_point_id: None,
        })
    }

    /// True only if all four eligibility sub-flags of the accounting details
    /// are set. Populated by `get_accounting_details`.
    pub fn supports_api(&self) -> bool {
        self.supports_api
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn metering_point_id(&self) -> Option<&str> {
        self.metering_point_id.as_deref()
    }

    /// Adopts a persisted session if one is stored and still accepted by the
    /// provider, otherwise performs a fresh login. Supplying a credential
    /// overwrites the stored one and invalidates any cached session.
    pub async fn authenticate(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), Error> {
        if username.is_some() || password.is_some() {
            if let Some(username) = username {
                self.username = String::from(username);
            }
            if let Some(password) = password {
                self.password = String::from(password);
            }
            self.session = None;
            self.store.clear()?;
        }

        if let Some(handle) = self.store.load() {
            log::info!("checking stored session");
            if self.check_session(&handle).await {
                log::info!("stored session is valid");
                self.session = Some(handle);
                return Ok(());
            }
            log::info!("stored session is invalid, reauthenticating");
        }

        log::info!("starting new session");
        let url = format!("{}{}", self.base_url, endpoint::LOGIN);
        let auth_data = HashMap::from([
            ("user", self.username.to_owned()),
            ("pwd", self.password.to_owned()),
        ]);

        let response = self
            .client
            .post(url)
            .json(&auth_data)
            .send()
            .await
            .map_err(|e| Error::ConnectionError(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(Error::LoginError(String::from(
                    "check username and password",
                )));
            }
            status => {
                return Err(Error::ConnectionError(format!(
                    "authentication failed with status {}",
                    status
                )));
            }
        }

        let handle = SessionHandle::from_cookies(
            response
                .cookies()
                .map(|cookie| (String::from(cookie.name()), String::from(cookie.value()))),
        );
        if handle.is_empty() {
            return Err(Error::LoginError(String::from(
                "no session cookies received",
            )));
        }

        /* An unsaved session still works for this run */
        if let Err(e) = self.store.save(&handle) {
            log::warn!("unable to persist session: {}", e);
        }

        log::info!("authentication successful");
        self.session = Some(handle);
        Ok(())
    }

    /// Removes the persisted session blob.
    pub fn clear_stored(&self) -> Result<(), Error> {
        self.store.clear()
    }

    /// Lightweight probe with the candidate cookie set. Network failures
    /// count as invalid and fall through to a fresh login.
    async fn check_session(&self, handle: &SessionHandle) -> bool {
        let url = format!("{}{}", self.base_url, endpoint::USER_BASIC_INFO);
        match self
            .client
            .get(url)
            .header(header::COOKIE, handle.cookie_header())
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                log::warn!("session check failed: {}", e);
                false
            }
        }
    }

    async fn get(
        &self,
        endpoint: &Endpoint,
        params: Option<&[(&str, String)]>,
    ) -> reqwest::Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.get(url);
        if let Some(params) = params {
            request = request.query(params);
        }
        if let Some(session) = &self.session {
            request = request.header(header::COOKIE, session.cookie_header());
        }
        request.send().await
    }

    /// Authenticated GET with at most one re-authentication retry. A 401
    /// means the session expired server-side: the cached copy is known bad,
    /// so it is cleared before logging in again.
    pub(crate) async fn call_api(
        &mut self,
        endpoint: &Endpoint,
        params: Option<&[(&str, String)]>,
    ) -> Result<Value, Error> {
        if self.session.is_none() {
            self.authenticate(None, None).await?;
        }

        let mut reauthenticated = false;
        loop {
            let response = self
                .get(endpoint, params)
                .await
                .map_err(|e| Error::ApiError(e.to_string()))?;

            match response.status() {
                StatusCode::OK => {
                    return response.json().await.map_err(|e| {
                        Error::InvalidResponse(e.to_string(), format!("GET {}", endpoint))
                    });
                }
                StatusCode::UNAUTHORIZED if !reauthenticated => {
                    log::warn!("session expired, reauthenticating");
                    self.session = None;
                    self.store.clear()?;
                    self.authenticate(None, None).await?;
                    reauthenticated = true;
                }
                status => {
                    return Err(Error::ApiError(format!(
                        "request to {} failed with status {}",
                        endpoint, status
                    )));
                }
            }
        }
    }

    /// First element of the user-info payload, as raw JSON (the user record
    /// has no documented schema).
    pub async fn get_user_details(&mut self) -> Result<Value, Error> {
        let value = self
            .call_api(endpoint::USER_BASIC_INFO, Some(&context_params()))
            .await?;
        first_element(value)
    }

    /// First element of the accounting payload. Updates the capability flag
    /// and caches the account id.
    pub async fn get_accounting_details(&mut self) -> Result<AccountingDetails, Error> {
        let value = self
            .call_api(endpoint::ACCOUNTING_DETAILS, Some(&context_params()))
            .await?;
        let details: AccountingDetails = first_element(value)?;

        self.supports_api = details.supports_api();
        self.account_id = Some(details.account_id.to_owned());
        Ok(details)
    }

    /// First element of the meter payload. Fetches the accounting details
    /// first when no account id is cached yet; caches the metering point id.
    pub async fn get_meter_details(&mut self) -> Result<MeterDetails, Error> {
        let account_id = match &self.account_id {
            Some(account_id) => account_id.to_owned(),
            None => self.get_accounting_details().await?.account_id,
        };

        let params = [
            ("context", String::from(CONTEXT)),
            ("accountId", account_id),
        ];
        let value = self.call_api(endpoint::METER_DETAILS, Some(&params)).await?;
        let details: MeterDetails = first_element(value)?;

        self.metering_point_id = Some(details.metering_point_id.to_owned());
        Ok(details)
    }

    /// Hourly buckets of one calendar day.
    pub async fn get_consumption_per_day(
        &mut self,
        day: NaiveDate,
    ) -> Result<ConsumptionSeries, Error> {
        log::info!("loading consumption for day {}", day);
        let params = vec![("day", day.format("%Y-%m-%d").to_string())];
        self.consumption_series(endpoint::CONSUMPTION_DAY, params)
            .await
    }

    /// Daily buckets of one calendar month.
    pub async fn get_consumption_for_month(
        &mut self,
        year: i32,
        month: u32,
    ) -> Result<ConsumptionSeries, Error> {
        log::info!("loading consumption for month {}/{}", month, year);
        let params = vec![("year", year.to_string()), ("month", month.to_string())];
        self.consumption_series(endpoint::CONSUMPTION_MONTH, params)
            .await
    }

    /// Monthly buckets of one calendar year.
    pub async fn get_consumption_for_year(
        &mut self,
        year: i32,
    ) -> Result<ConsumptionSeries, Error> {
        log::info!("loading consumption for year {}", year);
        let params = vec![("year", year.to_string())];
        self.consumption_series(endpoint::CONSUMPTION_YEAR, params)
            .await
    }

    async fn resolved_metering_point(&mut self) -> Result<String, Error> {
        if self.metering_point_id.is_none() {
            self.get_meter_details().await?;
        }
        self.metering_point_id
            .to_owned()
            .ok_or(Error::UnexpectedApiResponse)
    }

    /// Shared fetch path of the three consumption accessors. Anything short
    /// of an authentication failure is swallowed into an empty series, so
    /// callers must treat "empty" as "no data or error".
    async fn consumption_series(
        &mut self,
        endpoint: &Endpoint,
        mut params: Vec<(&str, String)>,
    ) -> Result<ConsumptionSeries, Error> {
        let meter_id = match self.resolved_metering_point().await {
            Ok(meter_id) => meter_id,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("unable to resolve metering point: {}", e);
                return Ok(Vec::new());
            }
        };
        params.insert(0, ("meterId", meter_id));

        let value = match self.call_api(endpoint, Some(&params)).await {
            Ok(value) => value,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("consumption request failed: {}", e);
                return Ok(Vec::new());
            }
        };

        let records: ConsumptionRecords = match serde_json::from_value(value) {
            Ok(records) => records,
            Err(e) => {
                log::warn!("unexpected consumption payload: {}", e);
                return Ok(Vec::new());
            }
        };

        match records.into_series() {
            Ok(series) => Ok(series),
            Err(e) => {
                log::warn!("unreadable consumption timestamps: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

fn context_params() -> [(&'static str, String); 1] {
    [("context", String::from(CONTEXT))]
}

fn first_element<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value::<Vec<T>>(value)
        .or(Err(Error::UnexpectedApiResponse))?
        .into_iter()
        .next()
        .ok_or(Error::UnexpectedApiResponse)
}

#[cfg(test)]
mod test {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use tempfile::TempDir;

    const ACCOUNTING_BODY: &str = r#"[{
        "accountId": "AC-1",
        "hasSmartMeter": true,
        "hasElectricity": true,
        "hasCommunicative": true,
        "hasActive": true
    }]"#;

    const METER_BODY: &str = r#"[{"meteringPointId": "MP-1"}]"#;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn client(server: &ServerGuard, dir: &TempDir) -> Smartmeter {
        Smartmeter::with_base_url(
            server.url(),
            dir.path().join("session.json"),
            String::from("user"),
            String::from("secret"),
        )
        .unwrap()
    }

    fn seed_session(dir: &TempDir, cookie_value: &str) {
        SessionStore::new(dir.path().join("session.json"))
            .save(&SessionHandle::from_cookies(vec![(
                String::from("SessionId"),
                String::from(cookie_value),
            )]))
            .unwrap();
    }

    fn login_mock(server: &mut ServerGuard, cookie_value: &str) -> mockito::Mock {
        server
            .mock("POST", endpoint::LOGIN)
            .with_status(200)
            .with_header(
                "set-cookie",
                &format!("SessionId={}; Path=/; HttpOnly", cookie_value),
            )
            .create()
    }

    fn context_query() -> Matcher {
        Matcher::UrlEncoded(String::from("context"), String::from(CONTEXT))
    }

    #[tokio::test]
    async fn valid_stored_session_skips_login() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        seed_session(&dir, "stored");

        let probe = server
            .mock("GET", endpoint::USER_BASIC_INFO)
            .match_header("cookie", "SessionId=stored")
            .with_status(200)
            .create();
        let login = server.mock("POST", endpoint::LOGIN).expect(0).create();

        let mut smartmeter = client(&server, &dir);
        smartmeter.authenticate(None, None).await.unwrap();

        probe.assert();
        login.assert();
    }

    #[tokio::test]
    async fn invalid_stored_session_falls_back_to_login() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        seed_session(&dir, "stale");

        let probe = server
            .mock("GET", endpoint::USER_BASIC_INFO)
            .with_status(401)
            .create();
        let login = login_mock(&mut server, "fresh");

        let mut smartmeter = client(&server, &dir);
        smartmeter.authenticate(None, None).await.unwrap();

        probe.assert();
        login.assert();

        let stored = SessionStore::new(dir.path().join("session.json")).load().unwrap();
        assert_eq!("SessionId=fresh", stored.cookie_header());
    }

    #[tokio::test]
    async fn credential_change_clears_stored_session() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        seed_session(&dir, "stored");

        /* no validation probe expected: the store is cleared before loading */
        let probe = server
            .mock("GET", endpoint::USER_BASIC_INFO)
            .expect(0)
            .create();
        let login = server
            .mock("POST", endpoint::LOGIN)
            .match_body(Matcher::PartialJsonString(String::from(
                r#"{"user": "other"}"#,
            )))
            .with_status(200)
            .with_header("set-cookie", "SessionId=fresh; Path=/; HttpOnly")
            .create();

        let mut smartmeter = client(&server, &dir);
        smartmeter.authenticate(Some("other"), None).await.unwrap();

        probe.assert();
        login.assert();
    }

    #[tokio::test]
    async fn rejected_credentials_are_fatal() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server.mock("POST", endpoint::LOGIN).with_status(401).create();

        let mut smartmeter = client(&server, &dir);
        match smartmeter.authenticate(None, None).await {
            Err(Error::LoginError(_)) => {}
            other => panic!("expected LoginError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unexpected_login_status_is_a_connection_error() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server.mock("POST", endpoint::LOGIN).with_status(503).create();

        let mut smartmeter = client(&server, &dir);
        match smartmeter.authenticate(None, None).await {
            Err(Error::ConnectionError(message)) => assert!(message.contains("503")),
            other => panic!("expected ConnectionError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn login_without_cookies_is_rejected() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server.mock("POST", endpoint::LOGIN).with_status(200).create();

        let mut smartmeter = client(&server, &dir);
        match smartmeter.authenticate(None, None).await {
            Err(Error::LoginError(_)) => {}
            other => panic!("expected LoginError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_session_is_retried_once() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        seed_session(&dir, "old");

        let probe = server
            .mock("GET", endpoint::USER_BASIC_INFO)
            .match_header("cookie", "SessionId=old")
            .with_status(200)
            .create();
        let expired = server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .match_header("cookie", "SessionId=old")
            .with_status(401)
            .create();
        let login = login_mock(&mut server, "new");
        let retried = server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .match_header("cookie", "SessionId=new")
            .with_status(200)
            .with_body(ACCOUNTING_BODY)
            .create();

        let mut smartmeter = client(&server, &dir);
        smartmeter.authenticate(None, None).await.unwrap();
        let details = smartmeter.get_accounting_details().await.unwrap();

        assert_eq!("AC-1", details.account_id);
        assert_eq!(Some("AC-1"), smartmeter.account_id());
        assert!(smartmeter.supports_api());
        probe.assert();
        expired.assert();
        login.assert();
        retried.assert();
    }

    #[tokio::test]
    async fn retry_budget_is_one_reauthentication() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        /* lazy login plus exactly one reauthentication */
        let login = server
            .mock("POST", endpoint::LOGIN)
            .with_status(200)
            .with_header("set-cookie", "SessionId=s; Path=/; HttpOnly")
            .expect(2)
            .create();
        let unauthorized = server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .with_status(401)
            .expect(2)
            .create();

        let mut smartmeter = client(&server, &dir);
        match smartmeter.get_accounting_details().await {
            Err(Error::ApiError(message)) => assert!(message.contains("401")),
            other => panic!("expected ApiError, got {:?}", other),
        }

        login.assert();
        unauthorized.assert();
    }

    #[tokio::test]
    async fn capability_flag_follows_accounting_details() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        login_mock(&mut server, "s");
        server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .with_status(200)
            .with_body(
                r#"[{
                    "accountId": "AC-1",
                    "hasSmartMeter": true,
                    "hasElectricity": true,
                    "hasCommunicative": false,
                    "hasActive": true
                }]"#,
            )
            .create();

        let mut smartmeter = client(&server, &dir);
        assert!(!smartmeter.supports_api());

        smartmeter.get_accounting_details().await.unwrap();
        assert!(!smartmeter.supports_api());
        assert_eq!(Some("AC-1"), smartmeter.account_id());
    }

    #[tokio::test]
    async fn meter_details_resolve_account_id_first() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        login_mock(&mut server, "s");
        let accounting = server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .with_status(200)
            .with_body(ACCOUNTING_BODY)
            .create();
        let meter = server
            .mock("GET", endpoint::METER_DETAILS)
            .match_query(Matcher::AllOf(vec![
                context_query(),
                Matcher::UrlEncoded(String::from("accountId"), String::from("AC-1")),
            ]))
            .with_status(200)
            .with_body(METER_BODY)
            .create();

        let mut smartmeter = client(&server, &dir);
        let details = smartmeter.get_meter_details().await.unwrap();

        assert_eq!("MP-1", details.metering_point_id);
        assert_eq!(Some("MP-1"), smartmeter.metering_point_id());
        accounting.assert();
        meter.assert();
    }

    #[tokio::test]
    async fn consumption_failure_yields_empty_series() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        login_mock(&mut server, "s");
        server
            .mock("GET", endpoint::ACCOUNTING_DETAILS)
            .match_query(context_query())
            .with_status(200)
            .with_body(ACCOUNTING_BODY)
            .create();
        server
            .mock("GET", endpoint::METER_DETAILS)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(METER_BODY)
            .create();
        server
            .mock("GET", endpoint::CONSUMPTION_DAY)
            .match_query(Matcher::Any)
            .with_status(500)
            .create();

        let mut smartmeter = client(&server, &dir);
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let series = smartmeter.get_consumption_per_day(day).await.unwrap();

        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn rejected_login_propagates_through_consumption_accessors() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server.mock("POST", endpoint::LOGIN).with_status(401).create();

        let mut smartmeter = client(&server, &dir);
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        match smartmeter.get_consumption_per_day(day).await {
            Err(Error::LoginError(_)) => {}
            other => panic!("expected LoginError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn user_details_return_first_element() {
        init_logging();
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        login_mock(&mut server, "s");
        server
            .mock("GET", endpoint::USER_BASIC_INFO)
            .match_query(context_query())
            .with_status(200)
            .with_body(r#"[{"firstName": "Maria"}, {"firstName": "Josef"}]"#)
            .create();

        let mut smartmeter = client(&server, &dir);
        let details = smartmeter.get_user_details().await.unwrap();

        assert_eq!("Maria", details["firstName"]);
    }
}
