use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};
use triage_core::{
    Clock, ConfigError, EpicConfig, HttpTransport, PatientRecord, SourceError, SystemClock,
};

use crate::auth::{
    AuthState, AuthToken, AuthorizationRedirect, CallbackParams, TokenStore, STATE_STORAGE_KEY,
    TOKEN_STORAGE_KEY,
};
use crate::expansion::{DemoExpansion, ExpansionPolicy};
use crate::{bundle_resources, expand_records, extract_base_patient};

const STATE_LENGTH: usize = 13;

/// Epic FHIR client driving the OAuth2 authorization-code flow.
pub struct EpicClient<T> {
    transport: Arc<T>,
    config: EpicConfig,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    expansion: Arc<dyn ExpansionPolicy>,
    /// Transitional state while an exchange or refresh is on the wire.
    in_flight: Mutex<Option<AuthState>>,
}

impl<T: HttpTransport> EpicClient<T> {
    pub fn new(
        config: EpicConfig,
        transport: Arc<T>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            store,
            clock: Arc::new(SystemClock),
            expansion: Arc::new(DemoExpansion::default()),
            in_flight: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expansion(mut self, expansion: Arc<dyn ExpansionPolicy>) -> Self {
        self.expansion = expansion;
        self
    }

    /// A readable token is held. It may still need a refresh before use.
    pub fn is_authenticated(&self) -> bool {
        self.load_token().is_some()
    }

    pub fn auth_state(&self) -> AuthState {
        if let Some(state) = *self.phase() {
            return state;
        }
        match self.load_token() {
            Some(token) if token.needs_refresh(self.clock.now_millis()) => {
                AuthState::TokenNearExpiry
            }
            Some(_) => AuthState::Authenticated,
            None => match self.store.get(STATE_STORAGE_KEY) {
                Ok(Some(_)) => AuthState::AuthorizationRequested,
                _ => AuthState::Unauthenticated,
            },
        }
    }

    /// Generate and persist a fresh anti-CSRF state, and return where to send the user.
    pub fn initiate_authorization(&self) -> Result<AuthorizationRedirect, SourceError> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LENGTH)
            .map(char::from)
            .collect();

        self.set_phase(None);
        self.store
            .set(STATE_STORAGE_KEY, &state)
            .map_err(|err| SourceError::Auth(format!("could not persist state: {err}")))?;

        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|err| SourceError::Auth(format!("invalid authorize URL: {err}")))?;

        info!("authorization requested, redirecting to identity provider");
        Ok(AuthorizationRedirect {
            url: url.into(),
            state,
        })
    }

    /// Validate the redirect callback and exchange its code for a token.
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<AuthToken, SourceError> {
        let result = self.exchange_code(params).await;
        self.set_phase(None);
        if let Err(err) = &result {
            warn!(error = %err, "authorization callback rejected");
        }
        result
    }

    async fn exchange_code(&self, params: &CallbackParams) -> Result<AuthToken, SourceError> {
        if let Some(error) = &params.error {
            // The provider ended this attempt, so its state can no longer be redeemed.
            self.forget(STATE_STORAGE_KEY);
            return Err(SourceError::Auth(format!(
                "authorization server returned `{error}`"
            )));
        }

        let expected = self
            .store
            .get(STATE_STORAGE_KEY)
            .map_err(|err| SourceError::Auth(format!("could not read state: {err}")))?;

        // Rejections up to here keep the pending state: a stray or forged
        // callback must not invalidate the legitimate one still in flight.
        let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
            return Err(SourceError::Auth(
                "callback is missing the code or state".to_string(),
            ));
        };
        if expected.as_deref() != Some(state) {
            return Err(SourceError::Auth("state mismatch".to_string()));
        }

        self.set_phase(Some(AuthState::TokenExchangePending));
        let exchanged = self
            .transport
            .post_form(
                &self.config.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                ],
            )
            .await
            .map_err(|err| SourceError::Auth(format!("token exchange failed: {err}")))
            .and_then(|body| self.stamp_token(&body, None));
        // The matching state is spent once its code has been presented.
        self.forget(STATE_STORAGE_KEY);

        let token = exchanged?;
        self.save_token(&token)?;
        info!("authenticated with Epic");
        Ok(token)
    }

    /// A usable access token, refreshing it first when it is close to expiry.
    pub async fn access_token(&self) -> Result<String, SourceError> {
        let token = match self.stored_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(SourceError::NotAuthenticated),
            Err(err) => {
                warn!(error = %err, "stored token is corrupt, discarding");
                self.forget(TOKEN_STORAGE_KEY);
                return Err(SourceError::NotAuthenticated);
            }
        };
        if !token.needs_refresh(self.clock.now_millis()) {
            return Ok(token.access_token);
        }

        debug!("access token near expiry, refreshing");
        self.set_phase(Some(AuthState::RefreshPending));
        match self.refresh(&token).await {
            Ok(token) => {
                self.set_phase(None);
                Ok(token.access_token)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, session discarded");
                self.forget(TOKEN_STORAGE_KEY);
                // Reported until the user starts a new authorization.
                self.set_phase(Some(AuthState::RefreshFailed));
                Err(err)
            }
        }
    }

    async fn refresh(&self, current: &AuthToken) -> Result<AuthToken, SourceError> {
        let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
            SourceError::Auth("token expired and no refresh token is held".to_string())
        })?;

        let body = self
            .transport
            .post_form(
                &self.config.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.config.client_id.as_str()),
                ],
            )
            .await
            .map_err(|err| SourceError::Auth(format!("token refresh failed: {err}")))?;

        let token = self.stamp_token(&body, Some(refresh_token))?;
        self.save_token(&token)?;
        Ok(token)
    }

    /// Fetch the configured patient, its reports and lab observations, and
    /// expand them into `count` records.
    pub async fn fetch_patients(&self, count: usize) -> Result<Vec<PatientRecord>, SourceError> {
        let token = self.access_token().await?;
        let patient_id = self.config.patient_id.as_str();
        info!(count, "fetching Epic FHIR patient data");

        let patient = self
            .get_json(&self.config.resource_url(&format!("Patient/{patient_id}")), &[], &token)
            .await?;
        let reports = self
            .get_json(
                &self.config.resource_url("DiagnosticReport"),
                &[("patient", patient_id)],
                &token,
            )
            .await?;
        let observations = self
            .get_json(
                &self.config.resource_url("Observation"),
                &[("patient", patient_id), ("category", "laboratory")],
                &token,
            )
            .await?;

        let reports = bundle_resources(&reports);
        let observations = bundle_resources(&observations);
        debug!(
            reports = reports.len(),
            observations = observations.len(),
            "FHIR resources received"
        );

        let base = extract_base_patient(&patient, &reports, &observations)?;
        Ok(expand_records(
            &base,
            count,
            self.expansion.as_ref(),
            self.clock.today(),
        ))
    }

    /// Drop the stored token. No revocation call is made.
    pub fn logout(&self) {
        self.set_phase(None);
        self.forget(TOKEN_STORAGE_KEY);
        info!("logged out from Epic");
    }

    async fn get_json(
        &self,
        base: &str,
        params: &[(&str, &str)],
        token: &str,
    ) -> Result<Value, SourceError> {
        let url = if params.is_empty() {
            Url::parse(base)
        } else {
            Url::parse_with_params(base, params)
        }
        .map_err(|err| SourceError::Parse(format!("invalid FHIR URL {base}: {err}")))?;
        let body = self.transport.get_text(url.as_str(), Some(token)).await?;
        serde_json::from_str(&body)
            .map_err(|err| SourceError::Parse(format!("{url} returned invalid JSON: {err}")))
    }

    fn stamp_token(
        &self,
        body: &str,
        previous_refresh: Option<&str>,
    ) -> Result<AuthToken, SourceError> {
        let mut token: AuthToken = serde_json::from_str(body)
            .map_err(|err| SourceError::Auth(format!("unreadable token response: {err}")))?;
        token.received_at = self.clock.now_millis();
        if token.refresh_token.is_none() {
            token.refresh_token = previous_refresh.map(str::to_string);
        }
        Ok(token)
    }

    /// Read the stored token without touching the store. `Err` means the
    /// stored payload is not a token.
    fn stored_token(&self) -> Result<Option<AuthToken>, serde_json::Error> {
        let raw = self.store.get(TOKEN_STORAGE_KEY).unwrap_or_else(|err| {
            warn!(error = %err, "could not read stored token");
            None
        });
        raw.map(|raw| serde_json::from_str(&raw)).transpose()
    }

    fn load_token(&self) -> Option<AuthToken> {
        self.stored_token().ok().flatten()
    }

    fn save_token(&self, token: &AuthToken) -> Result<(), SourceError> {
        let json = serde_json::to_string(token)
            .map_err(|err| SourceError::Auth(format!("could not encode token: {err}")))?;
        self.store
            .set(TOKEN_STORAGE_KEY, &json)
            .map_err(|err| SourceError::Auth(format!("could not persist token: {err}")))
    }

    fn forget(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key, error = %err, "could not clear token store entry");
        }
    }

    fn phase(&self) -> std::sync::MutexGuard<'_, Option<AuthState>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, state: Option<AuthState>) {
        if let Some(state) = state {
            debug!(?state, "auth state transition");
        }
        *self.phase() = state;
    }
}
