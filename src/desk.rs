//! The front desk: turns conversation requests into engine calls and
//! engine outcomes into messages.
//!
//! Transport neutral. A request names a conversation; the desk resolves
//! the worker behind it, runs the engine operation, renders the outcome as
//! plain text with a keyboard, retracts the previous message of the
//! session and records the new one.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{DeskError, EngineError, Missing};
use crate::model::{ActorId, Batch, BatchId, ConversationId, MessageId, StageCompletionRecord};
use crate::notify::{Notification, Notifier};
use crate::products::{TranslatorRegistry, render_line_items};
use crate::progress::{
    Cancellation, Completion, CompletionSummary, Holder, ProgressSnapshot, StageCompletionEngine,
    StageMark, StatusReport,
};
use crate::session::{Session, SessionKey, SessionStore};
use crate::store::{ActorDirectory, LineItemSource};

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

const PROMPT: &str = "Production batch:\nSend the batch QR code or its identifier.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A scanned QR code or a typed batch identifier.
    Identifier(String),
    /// Data attached to a keyboard action, see [`Callback`].
    Callback(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub conversation: ConversationId,
    pub request: Request,
}

impl Inbound {
    pub fn new(conversation: ConversationId, request: Request) -> Self {
        Self {
            conversation,
            request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    StageDone,
    CancelFixation,
}

impl CallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackKind::StageDone => "batch-stage-done",
            CallbackKind::CancelFixation => "batch-fixation-cancel",
        }
    }
}

/// Keyboard callback payload, encoded as `<kind>|<batch-id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callback {
    pub kind: CallbackKind,
    pub batch: BatchId,
}

impl Callback {
    pub fn done(batch: BatchId) -> Self {
        Self {
            kind: CallbackKind::StageDone,
            batch,
        }
    }

    pub fn cancel(batch: BatchId) -> Self {
        Self {
            kind: CallbackKind::CancelFixation,
            batch,
        }
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.kind.as_str(), self.batch)
    }
}

impl FromStr for Callback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, batch) = s
            .split_once('|')
            .ok_or_else(|| format!("malformed callback: {s}"))?;
        let kind = match kind {
            "batch-stage-done" => CallbackKind::StageDone,
            "batch-fixation-cancel" => CallbackKind::CancelFixation,
            other => return Err(format!("unknown callback kind: {other}")),
        };
        let batch = batch
            .parse()
            .map_err(|e| format!("invalid batch id in callback: {e}"))?;
        Ok(Self { kind, batch })
    }
}

/// What to send and how to leave the session afterwards.
struct Reply {
    notification: Notification,
    awaiting_identifier: bool,
    target_batch: Option<BatchId>,
}

impl Reply {
    fn about(batch: BatchId, notification: Notification) -> Self {
        Self {
            notification,
            awaiting_identifier: false,
            target_batch: Some(batch),
        }
    }

    fn prompt(preface: Option<String>) -> Self {
        let text = match preface {
            Some(preface) => format!("{preface}\n\n{PROMPT}"),
            None => PROMPT.to_string(),
        };
        Self {
            notification: Notification::text(text),
            awaiting_identifier: true,
            target_batch: None,
        }
    }
}

pub struct FrontDesk {
    engine: StageCompletionEngine,
    directory: Arc<dyn ActorDirectory>,
    items: Arc<dyn LineItemSource>,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    translators: TranslatorRegistry,
    session_ttl: Duration,
}

impl FrontDesk {
    pub fn new(
        engine: StageCompletionEngine,
        directory: Arc<dyn ActorDirectory>,
        items: Arc<dyn LineItemSource>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            directory,
            items,
            sessions,
            notifier,
            translators: TranslatorRegistry::new(),
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        }
    }

    pub fn with_translators(mut self, translators: TranslatorRegistry) -> Self {
        self.translators = translators;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Handles one request. Returns the id of the delivered message, or
    /// `None` when the conversation has no active worker behind it.
    pub async fn handle(&self, inbound: Inbound) -> Result<Option<MessageId>, DeskError> {
        let conversation = inbound.conversation;
        let Some(actor) = self.directory.actor_for_conversation(&conversation).await? else {
            warn!(%conversation, "no worker linked to conversation");
            self.sessions.purge_conversation(&conversation).await?;
            return Ok(None);
        };

        let key = SessionKey::new(actor, conversation.clone());
        let session = self.sessions.get(&key).await?.unwrap_or_default();

        let reply = match self.dispatch(actor, &session, inbound.request).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.sessions.purge_conversation(&conversation).await?;
                return Ok(None);
            }
            Err(err) => {
                error!(%conversation, %actor, error = %err, "request failed");
                return Err(err);
            }
        };

        let mut notification = reply.notification;
        notification.retract.extend(session.last_message);
        let id = self.notifier.deliver(&conversation, notification).await?;
        debug!(%conversation, message = id.0, "session updated");
        self.sessions
            .set(
                key,
                Session {
                    awaiting_identifier: reply.awaiting_identifier,
                    last_message: Some(id),
                    target_batch: reply.target_batch,
                },
                self.session_ttl,
            )
            .await?;
        Ok(Some(id))
    }

    async fn dispatch(
        &self,
        actor: ActorId,
        session: &Session,
        request: Request,
    ) -> Result<Option<Reply>, DeskError> {
        match request {
            Request::Identifier(text) => self.identify(actor, &text).await,
            Request::Text(text) if session.awaiting_identifier => {
                self.identify(actor, &text).await
            }
            // Anything typed while a batch is on screen refreshes it.
            Request::Text(_) => match session.target_batch {
                Some(batch) => self.status(actor, batch).await,
                None => Ok(Some(Reply::prompt(None))),
            },
            Request::Callback(data) => match data.parse::<Callback>() {
                Ok(Callback {
                    kind: CallbackKind::StageDone,
                    batch,
                }) => self.complete(actor, batch).await,
                Ok(Callback {
                    kind: CallbackKind::CancelFixation,
                    batch,
                }) => self.cancel(actor, batch).await,
                Err(reason) => {
                    warn!(%reason, "callback rejected");
                    Ok(Some(Reply::prompt(None)))
                }
            },
        }
    }

    async fn identify(&self, actor: ActorId, identifier: &str) -> Result<Option<Reply>, DeskError> {
        match identifier.trim().parse::<BatchId>() {
            Ok(batch) => self.status(actor, batch).await,
            Err(_) => {
                debug!(identifier, "not a batch identifier");
                Ok(Some(Reply::prompt(None)))
            }
        }
    }

    async fn status(&self, actor: ActorId, batch: BatchId) -> Result<Option<Reply>, DeskError> {
        match self.engine.request_status(batch, actor).await {
            Ok(StatusReport::Active(snapshot)) => {
                let text = self.render_snapshot(&snapshot, actor).await?;
                Ok(Some(Reply::about(batch, self.with_keyboard(text, &snapshot))))
            }
            Ok(StatusReport::HeldByOther { batch: found, holder }) => Ok(Some(Reply::about(
                batch,
                Notification::text(render_held(&found, &holder)),
            ))),
            Ok(StatusReport::Completed(summary)) => Ok(Some(Reply::about(
                batch,
                Notification::text(self.render_summary(&summary).await?),
            ))),
            Err(err) => self.recover(err).await,
        }
    }

    async fn complete(&self, actor: ActorId, batch: BatchId) -> Result<Option<Reply>, DeskError> {
        match self.engine.complete_current_stage(batch, actor).await {
            Ok(Completion::Advanced { record, snapshot }) => {
                info!(%batch, %actor, "stage completed from conversation");
                let mut text = render_record(&snapshot.batch, &snapshot_label(&snapshot, &record), &record);
                text.push_str("\n\n");
                text.push_str(&self.render_snapshot(&snapshot, actor).await?);
                Ok(Some(Reply::about(batch, self.with_keyboard(text, &snapshot))))
            }
            Ok(Completion::Finished { record, summary }) => {
                info!(%batch, %actor, "batch finished from conversation");
                let label = summary
                    .stages
                    .iter()
                    .find(|stage| stage.stage == record.stage)
                    .map(|stage| stage.label.clone())
                    .unwrap_or_else(|| record.stage.to_string());
                let mut text = render_record(&summary.batch, &label, &record);
                text.push_str("\n\n");
                text.push_str(&self.render_summary(&summary).await?);
                Ok(Some(Reply::about(batch, Notification::text(text))))
            }
            Err(err) => self.recover(err).await,
        }
    }

    async fn cancel(&self, actor: ActorId, batch: BatchId) -> Result<Option<Reply>, DeskError> {
        match self.engine.cancel_fixation(batch, actor).await {
            Ok(Cancellation::Released { batch }) => Ok(Some(Reply::prompt(Some(format!(
                "Batch {} is no longer fixed to you.",
                batch.number
            ))))),
            Ok(Cancellation::AlreadyCompleted(summary)) => Ok(Some(Reply::about(
                batch,
                Notification::text(self.render_summary(&summary).await?),
            ))),
            Err(err) => self.recover(err).await,
        }
    }

    /// Renders expected rejections. Persistence failures propagate.
    async fn recover(&self, err: EngineError) -> Result<Option<Reply>, DeskError> {
        let reply = match err {
            EngineError::Persistence(err) => return Err(DeskError::Persistence(err)),
            EngineError::Unauthorized(actor) => {
                warn!(%actor, "worker profile is not active");
                return Ok(None);
            }
            EngineError::NotFound(Missing::Batch(batch)) => {
                debug!(%batch, "unknown batch");
                Reply::prompt(None)
            }
            EngineError::NotFound(Missing::Catalog(category)) => Reply::prompt(Some(format!(
                "No production stages are configured for category {category}."
            ))),
            EngineError::Conflict(holder) => Reply::prompt(Some(format!(
                "The batch is being processed by {}.",
                holder.display_name()
            ))),
            EngineError::NoRemainingStage(summary) => Reply::about(
                summary.batch.id,
                Notification::text(self.render_summary(&summary).await?),
            ),
            EngineError::NotHolder { .. } => {
                Reply::prompt(Some("The batch is not fixed to you.".to_string()))
            }
            EngineError::StageAlreadyCompleted(_) => Reply::prompt(Some(
                "This stage has already been completed.".to_string(),
            )),
        };
        Ok(Some(reply))
    }

    fn with_keyboard(&self, text: String, snapshot: &ProgressSnapshot) -> Notification {
        let batch = snapshot.batch.id;
        Notification::text(text)
            .with_action("Cancel", Callback::cancel(batch).to_string())
            .with_action(
                format!(
                    "Complete \"{}\" all {} pcs.",
                    snapshot.current.label, snapshot.batch.quantity
                ),
                Callback::done(batch).to_string(),
            )
    }

    async fn render_header(&self, out: &mut String, batch: &Batch) -> Result<(), DeskError> {
        let _ = writeln!(out, "Number: {}", batch.number);
        let _ = writeln!(out, "Total products: {} pcs.", batch.quantity);
        let items = self.items.line_items(batch.id).await?;
        if !items.is_empty() {
            let _ = writeln!(out, "\nProducts:");
            out.push_str(&render_line_items(&items, &self.translators));
        }
        Ok(())
    }

    async fn render_snapshot(
        &self,
        snapshot: &ProgressSnapshot,
        actor: ActorId,
    ) -> Result<String, DeskError> {
        let mut out = String::from("Production batch:\n\n");
        self.render_header(&mut out, &snapshot.batch).await?;

        let _ = writeln!(out, "\nProduction stages:");
        for progress in &snapshot.stages {
            match progress.mark {
                StageMark::Done => {
                    let _ = writeln!(out, "[x] {}", progress.stage.label);
                }
                StageMark::Current => {
                    let _ = writeln!(
                        out,
                        "[>] {} {} pcs",
                        progress.stage.label, snapshot.batch.quantity
                    );
                }
                StageMark::Pending => {
                    let _ = writeln!(out, "[ ] {}", progress.stage.label);
                }
            }
        }

        if let Some(comment) = &snapshot.batch.comment {
            let _ = writeln!(out, "\n{comment}");
        }
        if snapshot.holder == Some(actor) {
            let _ = write!(
                out,
                "\nThe batch is fixed to you. Choose Cancel to release it.\n\
                 If you find a defect, contact the person responsible for this batch."
            );
        }
        Ok(out)
    }

    async fn render_summary(&self, summary: &CompletionSummary) -> Result<String, DeskError> {
        let mut out = String::from("Production batch completed\n\n");
        self.render_header(&mut out, &summary.batch).await?;
        let _ = writeln!(out, "\nProduction stages:");
        for stage in &summary.stages {
            let _ = writeln!(out, "{}: {}", stage.label, stage.actor_name);
        }
        Ok(out)
    }
}

fn snapshot_label(snapshot: &ProgressSnapshot, record: &StageCompletionRecord) -> String {
    snapshot
        .stages
        .iter()
        .find(|progress| progress.stage.id == record.stage)
        .map(|progress| progress.stage.label.clone())
        .unwrap_or_else(|| record.stage.to_string())
}

fn render_held(batch: &Batch, holder: &Holder) -> String {
    format!(
        "Production batch:\n\nNumber: {}\nBeing processed by: {}",
        batch.number,
        holder.display_name()
    )
}

fn render_record(batch: &Batch, label: &str, record: &StageCompletionRecord) -> String {
    format!(
        "Completed production stage:\nBatch {}\nDate {}\n{} {} pcs.",
        batch.number,
        record.completed_at.format("%d.%m.%Y %H:%M"),
        label,
        record.quantity
    )
}
