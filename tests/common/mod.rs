//! Shared fixtures for the integration tests: deterministic embeddings, a
//! scripted chat model, a canned web-search client, and a minimal PDF
//! generator.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use lectern::embeddings::{EmbeddingClient, EmbeddingError, InputType};
use lectern::message::{ConversationMessage, ToolCall};
use lectern::providers::{
    ChatError, ChatModel, FsObjectStore, WebSearchClient, WebSearchError, WebSearchResult,
};
use lectern::service::{LecternService, ServiceDeps, ServiceOptions};
use lectern::stores::memory::{MemoryCache, MemoryChunkStore, MemoryConversationStore};
use lectern::tools::ToolDefinition;

pub const TEST_DIM: usize = 8;
pub const TEST_BUCKET: &str = "course-files";

/// Deterministic hash-based embeddings: identical texts map to identical
/// unit vectors.
#[derive(Default)]
pub struct MockEmbeddings {
    pub calls: Mutex<Vec<(usize, InputType)>>,
}

impl MockEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    fn vector_for(text: &str, dim: usize) -> Vec<f32> {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut vector = Vec::with_capacity(dim);
        for i in 0..dim {
            let mixed = state
                .wrapping_add(i as u64)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15);
            vector.push(((mixed >> 33) as f32 / u32::MAX as f32) - 0.25);
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter().map(|v| v / norm.max(1e-6)).collect()
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddings {
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
        dim: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.lock().push((texts.len(), input_type));
        Ok(texts.iter().map(|t| Self::vector_for(t, dim)).collect())
    }
}

/// Embeddings client that fails a fixed number of times before succeeding
/// (or forever, with `fail_times = usize::MAX`).
pub struct FlakyEmbeddings {
    pub inner: MockEmbeddings,
    pub fail_times: Mutex<usize>,
    pub fatal: bool,
}

impl FlakyEmbeddings {
    pub fn transient(fail_times: usize) -> Self {
        Self {
            inner: MockEmbeddings::new(),
            fail_times: Mutex::new(fail_times),
            fatal: false,
        }
    }

    pub fn fatal() -> Self {
        Self {
            inner: MockEmbeddings::new(),
            fail_times: Mutex::new(usize::MAX),
            fatal: true,
        }
    }
}

#[async_trait]
impl EmbeddingClient for FlakyEmbeddings {
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
        dim: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let should_fail = {
            let mut remaining = self.fail_times.lock();
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            } else {
                false
            }
        };
        if should_fail {
            return if self.fatal {
                Err(EmbeddingError::Auth { status: 401 })
            } else {
                Err(EmbeddingError::Unavailable { status: 503 })
            };
        }
        self.inner.embed(texts, input_type, dim).await
    }
}

/// One recorded chat-model call.
#[derive(Clone, Debug)]
pub struct ChatCall {
    pub system: String,
    pub messages: Vec<ConversationMessage>,
    pub bound_tools: Vec<String>,
}

/// Chat model that replays a script of assistant turns.
#[derive(Default)]
pub struct ScriptedChat {
    script: Mutex<VecDeque<Result<ConversationMessage, ChatError>>>,
    pub calls: Mutex<Vec<ChatCall>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        self.script
            .lock()
            .push_back(Ok(ConversationMessage::assistant(text)));
    }

    pub fn push_tool_calls(&self, calls: Vec<(&str, Value)>) {
        let mut msg = ConversationMessage::assistant("");
        for (i, (name, args)) in calls.into_iter().enumerate() {
            msg.tool_calls.push(ToolCall {
                id: format!("call-{}-{}", self.script.lock().len(), i),
                name: name.to_string(),
                arguments: args,
            });
        }
        self.script.lock().push_back(Ok(msg));
    }

    pub fn push_error(&self) {
        self.script.lock().push_back(Err(ChatError::BadRequest {
            status: 400,
            message: "scripted failure".to_string(),
        }));
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        system: &str,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
    ) -> Result<ConversationMessage, ChatError> {
        self.calls.lock().push(ChatCall {
            system: system.to_string(),
            messages: messages.to_vec(),
            bound_tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ConversationMessage::assistant("script exhausted")))
    }
}

/// Web search client returning a fixed result list.
pub struct StaticWeb {
    pub results: Vec<WebSearchResult>,
    pub fail: bool,
}

impl StaticWeb {
    pub fn with_results(count: usize) -> Self {
        let results = (0..count)
            .map(|i| WebSearchResult {
                title: format!("Result {}", i + 1),
                url: format!("https://example.com/{}", i + 1),
                content: format!("web content {}", i + 1),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect();
        Self {
            results,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl WebSearchClient for StaticWeb {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<WebSearchResult>, WebSearchError> {
        if self.fail {
            return Err(WebSearchError::Provider {
                status: 500,
                message: "search backend down".to_string(),
            });
        }
        let mut results = self.results.clone();
        results.truncate(max_results);
        Ok(results)
    }
}

/// Everything a service test needs to reach into.
pub struct TestHarness {
    pub service: LecternService,
    pub chunk_store: Arc<MemoryChunkStore>,
    pub conversations: Arc<MemoryConversationStore>,
    pub cache: Arc<MemoryCache>,
    pub chat: Arc<ScriptedChat>,
    pub embeddings: Arc<MockEmbeddings>,
    pub objects_dir: tempfile::TempDir,
}

pub fn harness() -> TestHarness {
    harness_with_web(StaticWeb::with_results(5))
}

pub fn harness_with_web(web: StaticWeb) -> TestHarness {
    let chunk_store = Arc::new(MemoryChunkStore::new());
    let conversations = Arc::new(MemoryConversationStore::new());
    let cache = Arc::new(MemoryCache::new());
    let chat = Arc::new(ScriptedChat::new());
    let embeddings = Arc::new(MockEmbeddings::new());
    let objects_dir = tempfile::tempdir().expect("tempdir");

    let deps = ServiceDeps {
        objects: Arc::new(FsObjectStore::new(objects_dir.path())),
        chunk_store: Arc::clone(&chunk_store) as _,
        conversation_store: Arc::clone(&conversations) as _,
        cache: Arc::clone(&cache) as _,
        embedder: Arc::clone(&embeddings) as _,
        chat: Arc::clone(&chat) as _,
        web_search: Arc::new(web),
    };
    let mut options = ServiceOptions::new(TEST_BUCKET);
    options.embedding_dim = TEST_DIM;

    TestHarness {
        service: LecternService::new(deps, options),
        chunk_store,
        conversations,
        cache,
        chat,
        embeddings,
        objects_dir,
    }
}

/// Bare chunk for store/pipeline tests, embedding unset.
pub fn make_chunk(course: &str, slide: &str, index: usize, text: &str) -> lectern::Chunk {
    lectern::Chunk {
        id: lectern::Chunk::stable_id(course, slide, index),
        course_id: course.to_string(),
        slide_id: slide.to_string(),
        chunk_index: index,
        text: text.to_string(),
        word_count: text.split_whitespace().count(),
        char_count: text.len(),
        split_level: lectern::SplitLevel::Markdown,
        page_start: 1,
        page_end: 1,
        headers_hierarchy: Vec::new(),
        headers_hierarchy_titles: Vec::new(),
        char_start_pos: 0,
        char_end_pos: text.len(),
        original_chunk_id: index,
        sentence_sibling_count: 1,
        sentence_sibling_index: 0,
        is_header: false,
        header_level: None,
        header_text: None,
        embedding: None,
        s3_file_name: "a.pdf".to_string(),
        total_pages: 1,
        timestamp: chrono::Utc::now(),
    }
}

/// Standard envelope for a rag_search tool call in scripts.
pub fn rag_call(query: &str) -> (&'static str, Value) {
    ("rag_search", json!({ "query": query }))
}

/// Write a minimal valid PDF with one text line per entry in `lines`, one
/// page per slice element.
pub fn minimal_pdf(pages: &[&[&str]]) -> Vec<u8> {
    fn escape(text: &str) -> String {
        text.replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)")
    }

    let page_count = pages.len();
    let font_obj = 3 + 2 * page_count;
    let total_objs = font_obj;

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_count
    ));
    for (i, lines) in pages.iter().enumerate() {
        let content_obj = 4 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_obj} 0 R >> >> /Contents {content_obj} 0 R >>"
        ));
        let mut stream = String::from("BT /F1 12 Tf 72 720 Td ");
        for (j, line) in lines.iter().enumerate() {
            if j > 0 {
                stream.push_str("0 -16 Td ");
            }
            stream.push_str(&format!("({}) Tj ", escape(line)));
        }
        stream.push_str("ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());
    assert_eq!(objects.len(), total_objs);

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(total_objs);
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }
    let xref_offset = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n", total_objs + 1));
    pdf.push_str("0000000000 65535 f \n");
    for offset in offsets {
        pdf.push_str(&format!("{offset:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        total_objs + 1,
        xref_offset
    ));
    pdf.into_bytes()
}
