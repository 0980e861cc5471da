//! In-memory fakes for tests.
//!
//! Enabled for this crate's own tests and, through the `mock` feature, for
//! downstream crates' tests. Every fake counts the calls made to it so
//! tests can assert which remote checks were skipped.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::clock::Clock;
use crate::door::{AuthorizationResult, DoorApi, ValidationResult};
use crate::error::{Error, Result};
use crate::geo::GeoCoordinate;
use crate::location::{LocationAccuracy, LocationProvider, LocationSample, PermissionStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn offline(endpoint: &str) -> Error {
    Error::RequestFailed {
        endpoint: endpoint.to_string(),
        message: "connection refused".to_string(),
    }
}

/// Scripted door server.
///
/// A successful `validate-with-geo` clears the validation-needed flag, the
/// way the real door does once a code is accepted, unless
/// [`FakeDoorApi::keep_validation_needed`] is set.
#[derive(Debug)]
pub struct FakeDoorApi {
    validation_needed: AtomicBool,
    keep_validation_needed: AtomicBool,
    offline: AtomicBool,
    authorization: Mutex<AuthorizationResult>,
    validation: Mutex<ValidationResult>,
    secret_code: Mutex<Option<String>>,
    push_accepted: AtomicBool,
    registered_tokens: Mutex<Vec<(String, String)>>,
    validation_needed_calls: AtomicUsize,
    authorization_calls: AtomicUsize,
    validate_with_geo_calls: AtomicUsize,
    unlock_calls: AtomicUsize,
    validate_code_calls: AtomicUsize,
}

impl FakeDoorApi {
    /// A door waiting for a code, an authorized device and an accepting server.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            validation_needed: AtomicBool::new(true),
            keep_validation_needed: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            authorization: Mutex::new(AuthorizationResult {
                authorized: true,
                message: None,
            }),
            validation: Mutex::new(ValidationResult {
                success: true,
                message: Some("Door validated".to_string()),
            }),
            secret_code: Mutex::new(None),
            push_accepted: AtomicBool::new(true),
            registered_tokens: Mutex::new(Vec::new()),
            validation_needed_calls: AtomicUsize::new(0),
            authorization_calls: AtomicUsize::new(0),
            validate_with_geo_calls: AtomicUsize::new(0),
            unlock_calls: AtomicUsize::new(0),
            validate_code_calls: AtomicUsize::new(0),
        }
    }

    /// Set the initial validation-needed flag.
    #[must_use]
    pub fn validation_needed(self, needed: bool) -> Self {
        self.set_validation_needed(needed);
        self
    }

    /// Refuse the device with `message`.
    #[must_use]
    pub fn unauthorized(self, message: &str) -> Self {
        self.set_authorized(false, Some(message));
        self
    }

    /// Answer validation requests with `success` and `message`.
    #[must_use]
    pub fn validation_response(self, success: bool, message: Option<&str>) -> Self {
        *lock(&self.validation) = ValidationResult {
            success,
            message: message.map(str::to_string),
        };
        self
    }

    /// Accept only `code` on the manual validation endpoint.
    #[must_use]
    pub fn secret_code(self, code: &str) -> Self {
        *lock(&self.secret_code) = Some(code.to_string());
        self
    }

    /// Answer push token registrations with `accepted`.
    #[must_use]
    pub fn push_accepted(self, accepted: bool) -> Self {
        self.push_accepted.store(accepted, Ordering::SeqCst);
        self
    }

    /// Change the validation-needed flag.
    pub fn set_validation_needed(&self, needed: bool) {
        self.validation_needed.store(needed, Ordering::SeqCst);
    }

    /// Keep the door waiting for a code after successful validations.
    pub fn keep_validation_needed(&self, keep: bool) {
        self.keep_validation_needed.store(keep, Ordering::SeqCst);
    }

    /// Change the authorization verdict.
    pub fn set_authorized(&self, authorized: bool, message: Option<&str>) {
        *lock(&self.authorization) = AuthorizationResult {
            authorized,
            message: message.map(str::to_string),
        };
    }

    /// Make every request fail as if the server were unreachable.
    pub fn fail_requests(&self, fail: bool) {
        self.offline.store(fail, Ordering::SeqCst);
    }

    /// Calls to `check-if-validation-needed`.
    pub fn validation_needed_calls(&self) -> usize {
        self.validation_needed_calls.load(Ordering::SeqCst)
    }

    /// Calls to `check-geo-authorization`.
    pub fn authorization_calls(&self) -> usize {
        self.authorization_calls.load(Ordering::SeqCst)
    }

    /// Calls to `validate-with-geo`.
    pub fn validate_with_geo_calls(&self) -> usize {
        self.validate_with_geo_calls.load(Ordering::SeqCst)
    }

    /// Calls to `unlock-via-geo`.
    pub fn unlock_calls(&self) -> usize {
        self.unlock_calls.load(Ordering::SeqCst)
    }

    /// Calls to the manual `validate` endpoint.
    pub fn validate_code_calls(&self) -> usize {
        self.validate_code_calls.load(Ordering::SeqCst)
    }

    /// `(push_token, device_id)` pairs sent to `register-push-token`.
    pub fn registered_tokens(&self) -> Vec<(String, String)> {
        lock(&self.registered_tokens).clone()
    }

    fn check_online(&self, endpoint: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(offline(endpoint))
        } else {
            Ok(())
        }
    }
}

impl Default for FakeDoorApi {
    fn default() -> Self {
        Self::ready()
    }
}

#[async_trait]
impl DoorApi for FakeDoorApi {
    async fn check_validation_needed(&self) -> Result<bool> {
        self.validation_needed_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(crate::door::CHECK_VALIDATION_NEEDED_PATH)?;
        Ok(self.validation_needed.load(Ordering::SeqCst))
    }

    async fn check_geo_authorization(&self, _device_id: &str) -> Result<AuthorizationResult> {
        self.authorization_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(crate::door::CHECK_GEO_AUTHORIZATION_PATH)?;
        Ok(lock(&self.authorization).clone())
    }

    async fn validate_with_geo(&self, _device_id: &str) -> Result<ValidationResult> {
        self.validate_with_geo_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(crate::door::VALIDATE_WITH_GEO_PATH)?;
        let result = lock(&self.validation).clone();
        if result.success && !self.keep_validation_needed.load(Ordering::SeqCst) {
            self.validation_needed.store(false, Ordering::SeqCst);
        }
        Ok(result)
    }

    async fn unlock_via_geo(&self, _device_id: &str) -> Result<ValidationResult> {
        self.unlock_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(crate::door::UNLOCK_VIA_GEO_PATH)?;
        Ok(lock(&self.validation).clone())
    }

    async fn validate_code(&self, secret_code: &str) -> Result<ValidationResult> {
        self.validate_code_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(crate::door::VALIDATE_CODE_PATH)?;
        let accepted = lock(&self.secret_code)
            .as_deref()
            .map_or(true, |expected| expected == secret_code);
        if accepted {
            self.validation_needed.store(false, Ordering::SeqCst);
            Ok(ValidationResult {
                success: true,
                message: Some("Code accepted".to_string()),
            })
        } else {
            Ok(ValidationResult::refused("Invalid code"))
        }
    }

    async fn register_push_token(&self, push_token: &str, device_id: &str) -> Result<bool> {
        self.check_online(crate::door::REGISTER_PUSH_TOKEN_PATH)?;
        lock(&self.registered_tokens).push((push_token.to_string(), device_id.to_string()));
        Ok(self.push_accepted.load(Ordering::SeqCst))
    }
}

/// Scripted location service.
///
/// Prompts resolve an undetermined permission to whatever was set with
/// [`FakeLocationProvider::prompt_grants`], denied by default.
#[derive(Debug)]
pub struct FakeLocationProvider {
    foreground: Mutex<PermissionStatus>,
    background: Mutex<PermissionStatus>,
    prompt_result: Mutex<PermissionStatus>,
    position: Mutex<Option<GeoCoordinate>>,
    foreground_prompts: AtomicUsize,
    background_prompts: AtomicUsize,
    position_calls: AtomicUsize,
}

impl FakeLocationProvider {
    /// Create a provider with the given permissions and no position.
    #[must_use]
    pub const fn new(foreground: PermissionStatus, background: PermissionStatus) -> Self {
        Self {
            foreground: Mutex::new(foreground),
            background: Mutex::new(background),
            prompt_result: Mutex::new(PermissionStatus::Denied),
            position: Mutex::new(None),
            foreground_prompts: AtomicUsize::new(0),
            background_prompts: AtomicUsize::new(0),
            position_calls: AtomicUsize::new(0),
        }
    }

    /// Both permissions granted, positioned at `coordinate`.
    #[must_use]
    pub fn granted_at(coordinate: GeoCoordinate) -> Self {
        let provider = Self::new(PermissionStatus::Granted, PermissionStatus::Granted);
        provider.move_to(coordinate);
        provider
    }

    /// Resolve prompts for undetermined permissions to `status`.
    #[must_use]
    pub fn prompt_grants(self, status: PermissionStatus) -> Self {
        *lock(&self.prompt_result) = status;
        self
    }

    /// Move the device.
    pub fn move_to(&self, coordinate: GeoCoordinate) {
        *lock(&self.position) = Some(coordinate);
    }

    /// Change the foreground permission.
    pub fn set_foreground(&self, status: PermissionStatus) {
        *lock(&self.foreground) = status;
    }

    /// Foreground permission prompts shown.
    pub fn foreground_prompts(&self) -> usize {
        self.foreground_prompts.load(Ordering::SeqCst)
    }

    /// Background permission prompts shown.
    pub fn background_prompts(&self) -> usize {
        self.background_prompts.load(Ordering::SeqCst)
    }

    /// Position fixes taken.
    pub fn position_calls(&self) -> usize {
        self.position_calls.load(Ordering::SeqCst)
    }

    fn prompt(&self, slot: &Mutex<PermissionStatus>) -> PermissionStatus {
        let mut status = lock(slot);
        if *status == PermissionStatus::Undetermined {
            *status = *lock(&self.prompt_result);
        }
        *status
    }
}

#[async_trait]
impl LocationProvider for FakeLocationProvider {
    async fn foreground_permission(&self) -> Result<PermissionStatus> {
        Ok(*lock(&self.foreground))
    }

    async fn request_foreground_permission(&self) -> Result<PermissionStatus> {
        self.foreground_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.prompt(&self.foreground))
    }

    async fn request_background_permission(&self) -> Result<PermissionStatus> {
        self.background_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.prompt(&self.background))
    }

    async fn current_position(&self, _accuracy: LocationAccuracy) -> Result<LocationSample> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        if !lock(&self.foreground).is_granted() {
            return Err(Error::LocationPermissionDenied);
        }
        lock(&self.position)
            .map(LocationSample::now)
            .ok_or_else(|| Error::LocationUnavailable("no fix".to_string()))
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Start at `now_millis`.
    #[must_use]
    pub const fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Move forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
