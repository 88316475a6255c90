mod store;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parrot_config::Config;
use parrot_contracts::{
    AddTriggerCommand, AutocompleteChoice, AutocompleteQuery, CommandOutcome, ErrorBody,
    ErrorResponse, MessageEvent, RemoveTriggerCommand, ReplyPlan, ReplyReason, SetCooldownCommand, SetEnabledCommand, Settings,
    SpaceCommand, SpaceId, TriggerId, TriggerList, TriggerRecord, UserId,
};
use parrot_kernel::{
    check_new_trigger, decode_cooldown, decode_enabled, encode_cooldown, encode_enabled,
    find_match, normalize_trigger, parse_rfc3339, rank, AddRejection, Claim, CooldownTracker,
    SETTING_COOLDOWN, SETTING_ENABLED,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use store::StoreError;
use store::StoreBackend;

pub async fn serve(
    cfg: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let state = AppState::new(&cfg).map_err(|e| e.to_string())?;
    Ok(Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/messages", post(messages))
        .route("/v1/commands/enable", post(command_enable))
        .route("/v1/commands/cooldown", post(command_cooldown))
        .route("/v1/commands/settings", post(command_settings))
        .route("/v1/commands/triggers/list", post(command_trigger_list))
        .route("/v1/commands/triggers/add", post(command_trigger_add))
        .route("/v1/commands/triggers/remove", post(command_trigger_remove))
        .route(
            "/v1/commands/triggers/autocomplete",
            post(command_trigger_autocomplete),
        )
        .with_state(state))
}

/// Failures surfaced to the command layer. None of them change state.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("this command is only available inside a space")]
    NotInScope,
    #[error("this trigger is already in use")]
    DuplicateTrigger,
    #[error("the maximum of {0} triggers has been reached")]
    LimitExceeded(usize),
    #[error("{0}")]
    InvalidInput(String),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NotInScope => "not_in_scope",
            CommandError::DuplicateTrigger => "duplicate_trigger",
            CommandError::LimitExceeded(_) => "limit_exceeded",
            CommandError::InvalidInput(_) => "validation_error",
            CommandError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CommandError::NotInScope | CommandError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CommandError::DuplicateTrigger => StatusCode::CONFLICT,
            CommandError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CommandError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<AddRejection> for CommandError {
    fn from(rejection: AddRejection) -> Self {
        match rejection {
            AddRejection::Duplicate(_) => CommandError::DuplicateTrigger,
            AddRejection::LimitReached(limit) => CommandError::LimitExceeded(limit),
        }
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<StoreBackend>>,
    cooldowns: Arc<CooldownTracker>,
    defaults: Settings,
    max_triggers: usize,
}

impl AppState {
    fn new(cfg: &Config) -> Result<Self, StoreError> {
        let defaults = Settings {
            enabled: cfg.defaults.enabled,
            cooldown_seconds: cfg.defaults.cooldown_seconds,
        };
        let store = StoreBackend::open(&cfg.store.kind, cfg.store.data_dir.as_deref(), defaults)?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            cooldowns: Arc::new(CooldownTracker::new()),
            defaults,
            max_triggers: cfg.triggers.max_per_space,
        })
    }

    async fn is_enabled(&self, space: SpaceId) -> Result<bool, StoreError> {
        let raw = self.store.lock().await.get_setting(space, SETTING_ENABLED)?;
        Ok(decode_enabled(raw.as_deref(), self.defaults.enabled))
    }

    async fn set_enabled(&self, space: SpaceId, enabled: bool) -> Result<(), StoreError> {
        self.store
            .lock()
            .await
            .set_setting(space, SETTING_ENABLED, &encode_enabled(enabled))
    }

    async fn cooldown_seconds(&self, space: SpaceId) -> Result<u64, StoreError> {
        let raw = self.store.lock().await.get_setting(space, SETTING_COOLDOWN)?;
        Ok(decode_cooldown(raw.as_deref(), self.defaults.cooldown_seconds))
    }

    async fn set_cooldown_seconds(&self, space: SpaceId, seconds: u64) -> Result<(), StoreError> {
        self.store
            .lock()
            .await
            .set_setting(space, SETTING_COOLDOWN, &encode_cooldown(seconds))
    }

    async fn settings(&self, space: SpaceId) -> Result<Settings, StoreError> {
        Ok(Settings {
            enabled: self.is_enabled(space).await?,
            cooldown_seconds: self.cooldown_seconds(space).await?,
        })
    }

    async fn list_triggers(&self, space: SpaceId) -> Result<Vec<TriggerRecord>, StoreError> {
        self.store.lock().await.list_triggers(space)
    }

    /// The store lock is held from the uniqueness/limit check to the insert.
    async fn add_trigger(
        &self,
        space: SpaceId,
        trigger: &str,
        response: &str,
        author_id: UserId,
    ) -> Result<TriggerId, CommandError> {
        let normalized = normalize_trigger(trigger);
        if normalized.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "trigger must not be empty".to_string(),
            ));
        }
        if response.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "response must not be empty".to_string(),
            ));
        }

        let mut store = self.store.lock().await;
        let existing = store.list_triggers(space)?;
        check_new_trigger(&existing, &normalized, self.max_triggers)?;
        let id = store.insert_trigger(space, &normalized, response, author_id)?;
        drop(store);

        info!(space_id = space, trigger_id = id, author_id, "trigger added");
        Ok(id)
    }

    async fn remove_trigger(&self, space: SpaceId, id: TriggerId) -> Result<bool, StoreError> {
        let removed = self.store.lock().await.delete_trigger(space, id)?;
        info!(space_id = space, trigger_id = id, removed, "trigger remove requested");
        Ok(removed)
    }

    async fn autocomplete(&self, space: SpaceId, current: &str) -> Result<Vec<AutocompleteChoice>, StoreError> {
        let triggers = self.list_triggers(space).await?;
        Ok(rank(current, triggers, |r| r.trigger.as_str())
            .iter()
            .map(AutocompleteChoice::from_record)
            .collect())
    }

    async fn process_message(&self, event: MessageEvent) -> Result<ReplyPlan, CommandError> {
        let now = match event.ts.as_deref() {
            Some(ts) => parse_rfc3339(ts)
                .ok_or_else(|| CommandError::InvalidInput("ts must be RFC3339".to_string()))?,
            None => Utc::now(),
        };
        Ok(self.handle_message(&event, now).await)
    }

    /// Decides whether `event` gets an automatic reply. The caller must send
    /// the reply of a `Replied` plan; the cooldown has already been recorded.
    #[tracing::instrument(skip_all, fields(space_id = ?event.space_id, user_id = event.author.id))]
    async fn handle_message(&self, event: &MessageEvent, now: DateTime<Utc>) -> ReplyPlan {
        let Some(space) = event.space_id else {
            debug!("message outside any space");
            return ReplyPlan::silent(None, ReplyReason::IgnoredOutOfScope);
        };
        if event.author.bot {
            debug!("message from automated author");
            return ReplyPlan::silent(Some(space), ReplyReason::IgnoredAutomatedAuthor);
        }

        let settings = match self.settings(space).await {
            Ok(v) => v,
            Err(e) => return store_unavailable(space, e),
        };
        if !settings.enabled {
            debug!("auto-replies disabled");
            return ReplyPlan::silent(Some(space), ReplyReason::Disabled);
        }

        let user = event.author.id;
        if !self
            .cooldowns
            .is_eligible(space, user, now, settings.cooldown_seconds)
        {
            debug!("cooling down");
            return ReplyPlan::silent(Some(space), ReplyReason::CoolingDown);
        }

        let triggers = match self.list_triggers(space).await {
            Ok(v) => v,
            Err(e) => return store_unavailable(space, e),
        };
        // Re-checked under the tracker lock: the store read above may have
        // let another message from this user through in the meantime.
        let claim = self
            .cooldowns
            .claim(space, user, now, settings.cooldown_seconds, || {
                find_match(&triggers, &event.content)
            });
        match claim {
            Claim::Claimed(record) => {
                info!(trigger_id = record.id, "auto-reply issued");
                ReplyPlan::reply(space, record)
            }
            Claim::CoolingDown => {
                debug!("cooling down");
                ReplyPlan::silent(Some(space), ReplyReason::CoolingDown)
            }
            Claim::Missed => {
                debug!("no trigger matched");
                ReplyPlan::silent(Some(space), ReplyReason::NoMatch)
            }
        }
    }
}

fn store_unavailable(space: SpaceId, err: StoreError) -> ReplyPlan {
    warn!(error = %err, "store unavailable, skipping auto-reply");
    ReplyPlan::silent(Some(space), ReplyReason::StoreUnavailable)
}

fn require_space(space_id: Option<SpaceId>) -> Result<SpaceId, CommandError> {
    space_id.ok_or(CommandError::NotInScope)
}

fn reject(err: CommandError) -> (StatusCode, Json<ErrorResponse>) {
    if matches!(err, CommandError::StoreUnavailable(_)) {
        warn!(error = %err, "command failed");
    }
    (
        err.status(),
        Json(ErrorResponse {
            error: ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }),
    )
}

type CommandResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn messages(
    State(state): State<AppState>,
    Json(event): Json<MessageEvent>,
) -> CommandResult<ReplyPlan> {
    state.process_message(event).await.map(Json).map_err(reject)
}

async fn command_enable(
    State(state): State<AppState>,
    Json(input): Json<SetEnabledCommand>,
) -> CommandResult<CommandOutcome> {
    let run = async {
        let space = require_space(input.space_id)?;
        state.set_enabled(space, input.enabled).await?;
        info!(space_id = space, enabled = input.enabled, "auto-replies toggled");
        Ok::<_, CommandError>(CommandOutcome::success(if input.enabled {
            "Auto-replies have been enabled for this space"
        } else {
            "Auto-replies have been disabled for this space"
        }))
    };
    run.await.map(Json).map_err(reject)
}

async fn command_cooldown(
    State(state): State<AppState>,
    Json(input): Json<SetCooldownCommand>,
) -> CommandResult<CommandOutcome> {
    let run = async {
        let space = require_space(input.space_id)?;
        let seconds = u64::try_from(input.cooldown_seconds).map_err(|_| {
            CommandError::InvalidInput("cooldown_seconds must be >= 0".to_string())
        })?;
        state.set_cooldown_seconds(space, seconds).await?;
        info!(space_id = space, cooldown_seconds = seconds, "cooldown updated");
        Ok::<_, CommandError>(CommandOutcome::success(format!(
            "Cooldown set to {seconds} seconds"
        )))
    };
    run.await.map(Json).map_err(reject)
}

async fn command_settings(
    State(state): State<AppState>,
    Json(input): Json<SpaceCommand>,
) -> CommandResult<Settings> {
    let run = async {
        let space = require_space(input.space_id)?;
        Ok::<_, CommandError>(state.settings(space).await?)
    };
    run.await.map(Json).map_err(reject)
}

async fn command_trigger_list(
    State(state): State<AppState>,
    Json(input): Json<SpaceCommand>,
) -> CommandResult<TriggerList> {
    let run = async {
        let space_id = require_space(input.space_id)?;
        let triggers = state.list_triggers(space_id).await?;
        Ok::<_, CommandError>(TriggerList { space_id, triggers })
    };
    run.await.map(Json).map_err(reject)
}

async fn command_trigger_add(
    State(state): State<AppState>,
    Json(input): Json<AddTriggerCommand>,
) -> CommandResult<CommandOutcome> {
    let run = async {
        let space = require_space(input.space_id)?;
        let id = state
            .add_trigger(space, &input.trigger, &input.response, input.author_id)
            .await?;
        Ok::<_, CommandError>(CommandOutcome::success(format!("Trigger {id} has been added")))
    };
    run.await.map(Json).map_err(reject)
}

async fn command_trigger_remove(
    State(state): State<AppState>,
    Json(input): Json<RemoveTriggerCommand>,
) -> CommandResult<CommandOutcome> {
    let run = async {
        let space = require_space(input.space_id)?;
        let removed = state.remove_trigger(space, input.id).await?;
        Ok::<_, CommandError>(CommandOutcome::success(if removed {
            format!("Trigger {} has been removed", input.id)
        } else {
            format!("No trigger with id {}; nothing was removed", input.id)
        }))
    };
    run.await.map(Json).map_err(reject)
}

/// Out of a space, or when the store fails, there is nothing to suggest.
async fn command_trigger_autocomplete(
    State(state): State<AppState>,
    Json(input): Json<AutocompleteQuery>,
) -> Json<Vec<AutocompleteChoice>> {
    let Some(space) = input.space_id else {
        return Json(Vec::new());
    };
    match state.autocomplete(space, &input.current).await {
        Ok(choices) => Json(choices),
        Err(e) => {
            warn!(space_id = space, error = %e, "autocomplete skipped");
            Json(Vec::new())
        }
    }
}
