/*!
 * Usage-limit gate for the cost-metered provider.
 *
 * Tracks per-UTC-day request counts against the configured allowance and
 * holds a global payment-required pause. Counter and pause survive restarts
 * through settings keys; limit events are appended to the provider audit
 * table.
 */

use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::database::Repository;
use crate::errors::ProviderError;
use crate::settings::{keys, SettingsStore};

/// Point-in-time view of the gate, exposed to the operator API
#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageSnapshot {
    /// UTC day the counter belongs to (YYYY-MM-DD)
    pub day: String,
    /// Requests used today
    pub requests_used: u64,
    /// Effective allowance (None when unmetered)
    pub allowed_requests_per_day: Option<u64>,
    /// Active payment-required pause, if any
    pub paused_until: Option<String>,
}

struct GateState {
    day: String,
    used: u64,
    paused_until: Option<DateTime<Utc>>,
}

/// Per-day request counter plus payment-required pause
#[derive(Clone)]
pub struct UsageGate {
    repo: Repository,
    settings: SettingsStore,
    state: Arc<Mutex<GateState>>,
    provider_name: String,
}

fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Next UTC midnight, the default counter/pause reset point
fn next_utc_midnight() -> DateTime<Utc> {
    let now = Utc::now();
    let tomorrow = now.date_naive() + chrono::Days::new(1);
    Utc.with_ymd_and_hms(tomorrow.year(), tomorrow.month(), tomorrow.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

impl UsageGate {
    /// Restore the gate from persisted state
    pub async fn load(
        repo: Repository,
        settings: SettingsStore,
        provider_name: String,
    ) -> Result<Self> {
        let day = settings
            .get(keys::PROVIDER_USAGE_DAY)
            .await?
            .unwrap_or_else(today_utc);
        let used = settings
            .get(keys::PROVIDER_USAGE_COUNT)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let paused_until = settings
            .get(keys::PROVIDER_PAUSE_UNTIL)
            .await?
            .filter(|v| !v.is_empty())
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            repo,
            settings,
            state: Arc::new(Mutex::new(GateState {
                day,
                used,
                paused_until,
            })),
            provider_name,
        })
    }

    /// Effective allowance: override when set, else plan minus buffer.
    /// None means the provider is unmetered.
    async fn allowed_requests_per_day(&self) -> Result<Option<u64>> {
        let plan: u64 = self
            .settings
            .get_or(keys::PROVIDER_PLAN_REQUESTS_PER_DAY, "0")
            .await?
            .parse()
            .unwrap_or(0);
        let override_value: Option<u64> = self
            .settings
            .get(keys::PROVIDER_OVERRIDE_REQUESTS_PER_DAY)
            .await?
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok());
        let buffer: u64 = self
            .settings
            .get_or(keys::PROVIDER_REQUEST_BUFFER, "0")
            .await?
            .parse()
            .unwrap_or(0);

        let base = override_value.unwrap_or(plan);
        if base == 0 {
            return Ok(None);
        }
        Ok(Some(base.saturating_sub(buffer)))
    }

    /// Roll the day counter and expire a passed pause. Returns the state
    /// values after the roll.
    fn roll_day(&self) -> (String, u64, Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        let today = today_utc();
        if state.day != today {
            state.day = today;
            state.used = 0;
        }
        if let Some(until) = state.paused_until {
            if until <= Utc::now() {
                state.paused_until = None;
            }
        }
        (state.day.clone(), state.used, state.paused_until)
    }

    async fn persist(&self) -> Result<()> {
        let (day, used, paused) = {
            let state = self.state.lock();
            (state.day.clone(), state.used, state.paused_until)
        };
        self.settings.set(keys::PROVIDER_USAGE_DAY, &day).await?;
        self.settings
            .set(keys::PROVIDER_USAGE_COUNT, &used.to_string())
            .await?;
        self.settings
            .set(
                keys::PROVIDER_PAUSE_UNTIL,
                &paused.map(|p| p.to_rfc3339()).unwrap_or_default(),
            )
            .await?;
        Ok(())
    }

    /// Gate check before every provider request
    pub async fn ensure_request_allowed(&self, model: &str) -> Result<(), ProviderError> {
        let (_, used, paused_until) = self.roll_day();

        if let Some(until) = paused_until {
            return Err(ProviderError::PaymentRequired(format!(
                "provider paused until {}",
                until.to_rfc3339()
            )));
        }

        let allowed = self
            .allowed_requests_per_day()
            .await
            .map_err(|e| ProviderError::Transient(format!("settings unavailable: {}", e)))?;

        if let Some(allowed) = allowed {
            if used >= allowed {
                let _ = self
                    .repo
                    .append_provider_log(
                        &self.provider_name,
                        "limit_reached",
                        Some(format!("{}/{} requests used", used, allowed)),
                    )
                    .await;
                return Err(ProviderError::DailyLimitReached {
                    model: model.to_string(),
                    used,
                    allowed,
                });
            }
        }

        Ok(())
    }

    /// Count one request against today's allowance
    pub async fn record_request(&self) -> Result<()> {
        self.roll_day();
        {
            let mut state = self.state.lock();
            state.used += 1;
        }
        self.persist().await
    }

    /// Raise the global payment-required pause. Without a provider-reported
    /// reset the pause ends at the next UTC midnight.
    pub async fn notify_payment_required(&self, reset_at: Option<DateTime<Utc>>) -> Result<()> {
        let until = reset_at.unwrap_or_else(next_utc_midnight);
        {
            let mut state = self.state.lock();
            state.paused_until = Some(until);
        }
        warn!(
            "Provider {} paused (payment required) until {}",
            self.provider_name,
            until.to_rfc3339()
        );
        self.repo
            .append_provider_log(
                &self.provider_name,
                "payment_required",
                Some(format!("paused until {}", until.to_rfc3339())),
            )
            .await?;
        self.persist().await
    }

    /// Current gate state for the operator API
    pub async fn snapshot(&self) -> Result<UsageSnapshot> {
        let (day, used, paused) = self.roll_day();
        Ok(UsageSnapshot {
            day,
            requests_used: used,
            allowed_requests_per_day: self
                .allowed_requests_per_day()
                .await
                .unwrap_or(None),
            paused_until: paused.map(|p| p.to_rfc3339()),
        })
    }
}
