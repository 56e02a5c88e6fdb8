use crate::analytics::Analytics;
use crate::classify::{Classification, classify};
use crate::generator::Generator;
use crate::images::{ImageWorker, extract_image_requests};
use crate::knowledge::retrieval::{Retrieved, Retriever};
use crate::layout::render_blocks;
use crate::logger::RequestLogger;
use crate::session::{Session, SessionManager};
use crate::utils::slugify;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The named events a generation request streams, in protocol order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Classification(Classification),
    Retrieval {
        products: usize,
        faqs: usize,
        videos: usize,
        recipes: usize,
    },
    GenerationStart,
    Layout {
        block_count: usize,
        skipped_count: usize,
    },
    Block {
        name: String,
        html: String,
        section_style: Option<String>,
    },
    ImageReady {
        id: String,
        url: String,
    },
    Complete {
        block_count: usize,
        elapsed_ms: u64,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification",
            Self::Retrieval { .. } => "retrieval",
            Self::GenerationStart => "generation-start",
            Self::Layout { .. } => "layout",
            Self::Block { .. } => "block",
            Self::ImageReady { .. } => "image-ready",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Classification(c) => serde_json::to_value(c).unwrap_or_else(|_| json!({})),
            Self::Retrieval {
                products,
                faqs,
                videos,
                recipes,
            } => json!({
                "products": products,
                "faqs": faqs,
                "videos": videos,
                "recipes": recipes,
            }),
            Self::GenerationStart => json!({}),
            Self::Layout {
                block_count,
                skipped_count,
            } => json!({"blockCount": block_count, "skippedCount": skipped_count}),
            Self::Block {
                name,
                html,
                section_style,
            } => {
                let mut payload = json!({"name": name, "html": html});
                if let Some(style) = section_style {
                    payload["sectionStyle"] = json!(style);
                }
                payload
            }
            Self::ImageReady { id, url } => json!({"id": id, "url": url}),
            Self::Complete {
                block_count,
                elapsed_ms,
            } => json!({"success": true, "blockCount": block_count, "elapsedMs": elapsed_ms}),
            Self::Error { message } => json!({"message": message}),
        }
    }
}

/// Why the pipeline stopped before completing.
enum Halt {
    /// A phase failed beyond recovery; an `error` event should be emitted.
    Failed(String),
    /// The client went away; nothing more can be delivered.
    Disconnected,
}

/// Drives classification → retrieval → generation → layout and emits the
/// event sequence. Emits `complete` or `error` exactly once; the receiver
/// side of the channel closing is the cancellation signal.
pub struct Pipeline {
    retriever: Retriever,
    generator: Generator,
    images: Arc<ImageWorker>,
    sessions: Arc<SessionManager>,
    analytics: Arc<Analytics>,
}

impl Pipeline {
    pub fn new(
        retriever: Retriever,
        generator: Generator,
        images: Arc<ImageWorker>,
        sessions: Arc<SessionManager>,
        analytics: Arc<Analytics>,
    ) -> Self {
        Self {
            retriever,
            generator,
            images,
            sessions,
            analytics,
        }
    }

    pub async fn run(&self, query: &str, session_id: Option<&str>, tx: mpsc::Sender<StreamEvent>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let log = RequestLogger::new(&request_id).with_query(query);

        // Client disconnect (the receiver dropping) cancels in-flight image
        // work through this token.
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                tx.closed().await;
                cancel.cancel();
            }
        });

        match self.run_inner(query, session_id, &tx, &cancel, &log).await {
            Ok(block_count) => {
                let _ = tx
                    .send(StreamEvent::Complete {
                        block_count,
                        elapsed_ms: log.elapsed_ms(),
                    })
                    .await;
                log.request_complete(true);
            }
            Err(Halt::Failed(message)) => {
                log.error("pipeline", &message);
                let _ = tx.send(StreamEvent::Error { message }).await;
                log.request_complete(false);
            }
            Err(Halt::Disconnected) => {
                log.info("client disconnected; aborting pipeline");
                log.request_complete(false);
            }
        }
        // The watcher holds a sender clone; abort it so the channel closes.
        watcher.abort();
    }

    async fn emit(&self, tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), Halt> {
        tx.send(event).await.map_err(|_| Halt::Disconnected)
    }

    async fn run_inner(
        &self,
        query: &str,
        session_id: Option<&str>,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        log: &RequestLogger,
    ) -> Result<usize, Halt> {
        if query.trim().is_empty() {
            return Err(Halt::Failed("query must not be empty".to_string()));
        }

        let mut session = match self.sessions.get_or_create(session_id).await {
            Ok(session) => session,
            Err(e) => {
                // A broken session store degrades to a fresh anonymous session.
                log.error("upstream", &format!("session lookup failed: {e}"));
                Session::new(crate::utils::alnum_id())
            }
        };

        log.set_phase("classification");
        let classification = classify(query);
        self.emit(tx, StreamEvent::Classification(classification.clone()))
            .await?;
        log.phase_complete(true);

        log.set_phase("retrieval");
        let retrieved = match self.retriever.retrieve(&classification, log).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                // Degrade to an empty retrieved set rather than aborting.
                log.error("upstream", &format!("retrieval failed: {e}"));
                Retrieved::default()
            }
        };
        let (products, faqs, recipes, videos) = retrieved.counts();
        self.emit(
            tx,
            StreamEvent::Retrieval {
                products,
                faqs,
                videos,
                recipes,
            },
        )
        .await?;
        log.phase_complete(true);

        log.set_phase("generation");
        self.emit(tx, StreamEvent::GenerationStart).await?;
        let content = self
            .generator
            .generate(query, &classification, &retrieved, &session, log)
            .await;
        if content.atoms.is_empty() {
            log.phase_complete(false);
            return Err(Halt::Failed(
                "the model produced no usable content for this query".to_string(),
            ));
        }
        log.phase_complete(true);

        log.set_phase("layout");
        let slug = slugify(query);
        let layout = render_blocks(&content.atoms, &content.suggested_blocks, &slug);
        self.emit(
            tx,
            StreamEvent::Layout {
                block_count: layout.blocks.len(),
                skipped_count: layout.skipped,
            },
        )
        .await?;
        if layout.blocks.is_empty() {
            log.phase_complete(false);
            return Err(Halt::Failed(
                "every suggested block rendered empty".to_string(),
            ));
        }

        let mut page_html = String::new();
        for block in &layout.blocks {
            page_html.push_str(&block.html);
            self.emit(
                tx,
                StreamEvent::Block {
                    name: block.name.clone(),
                    html: block.html.clone(),
                    section_style: block.section_style.clone(),
                },
            )
            .await?;
        }
        log.phase_complete(true);

        log.set_phase("images");
        let image_requests = extract_image_requests(&page_html, &slug);
        if !image_requests.is_empty() {
            let results = self.images.process(image_requests, log, cancel).await;
            if cancel.is_cancelled() {
                return Err(Halt::Disconnected);
            }
            for (id, url) in results {
                self.emit(tx, StreamEvent::ImageReady { id, url }).await?;
            }
        }
        log.phase_complete(true);

        log.set_phase("record");
        let type_label = serde_json::to_value(classification.query_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "general".to_string());
        if let Err(e) = self
            .sessions
            .add_query(&mut session, query, &type_label, None)
            .await
        {
            log.warn(&format!("failed to record query on session: {e}"));
        }
        if let Err(e) = self
            .analytics
            .record_generation(&session.id, query, layout.blocks.len())
            .await
        {
            log.warn(&format!("failed to record generation event: {e}"));
        }

        Ok(layout.blocks.len())
    }
}
