//! End-to-end tests of the completion pipeline against a scripted vendor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::stream;

use quill::vendor::ChunkStream;
use quill::{
    Cache, ChatStore, Chunk, CompletionEngine, CompletionOptions, CompletionRequest,
    DefaultHandler, DefaultRole, FinishReason, FunctionRegistry, Interrupt, MarkdownPrinter,
    Message, MessageRole, Printer, Result, ShellEnv, TextPrinter, Vendor,
};

/// Answers each request with the next canned chunk list.
#[derive(Default)]
struct ScriptedVendor {
    responses: Mutex<VecDeque<Vec<Chunk>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedVendor {
    fn new(responses: Vec<Vec<Chunk>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Vendor for ScriptedVendor {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let chunks = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

fn env() -> ShellEnv {
    ShellEnv {
        os: "Linux".to_string(),
        shell: "bash".to_string(),
    }
}

fn hi_there() -> Vec<Chunk> {
    vec![
        Chunk::text("Hi"),
        Chunk::text(" there").with_finish_reason(FinishReason::Stop),
    ]
}

fn request(prompt: &str) -> CompletionRequest {
    let role = DefaultRole::Default.role(&env());
    CompletionRequest::new(
        "gpt-4o",
        vec![Message::system(&role.role), Message::user(prompt)],
    )
}

async fn collect(
    engine: &CompletionEngine<ScriptedVendor>,
    request: CompletionRequest,
    caching: bool,
) -> Vec<String> {
    let role = DefaultRole::Default.role(&env());
    engine
        .complete(&role, request, caching)
        .unwrap()
        .map(|fragment| fragment.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn hello_is_printed_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![hi_there()]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::with_builtins(),
        Cache::new(dir.path(), 10),
    );
    let handler = DefaultHandler::new(
        engine.clone(),
        DefaultRole::Default.role(&env()),
        Interrupt::new(),
    );
    let options = CompletionOptions::new("gpt-4o");
    let mut printer = TextPrinter::new(Vec::new(), None, true);
    let printed = handler.handle("hello", &options, &mut printer).await.unwrap();
    assert_eq!(printed.text, "Hi there");
    assert_eq!(printer.get_ref().as_slice(), b"Hi there\n");
    assert_eq!(vendor.calls(), 1);
    assert_eq!(engine.cache().len(), 1);

    // The same prompt again is answered from the cache.
    let mut printer = TextPrinter::new(Vec::new(), None, true);
    let printed = handler.handle("hello", &options, &mut printer).await.unwrap();
    assert_eq!(printed.text, "Hi there");
    assert_eq!(vendor.calls(), 1);
}

#[tokio::test]
async fn cached_requests_replay_without_the_vendor() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![hi_there()]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::new(),
        Cache::new(dir.path(), 10),
    );
    let first = collect(&engine, request("hello"), true).await;
    let second = collect(&engine, request("hello"), true).await;
    assert_eq!(first, vec!["Hi", " there"]);
    assert_eq!(first, second);
    assert_eq!(vendor.calls(), 1);

    let role = DefaultRole::Default.role(&env());
    let completion = engine.complete(&role, request("hello"), true).unwrap();
    assert!(completion.is_replay());
}

#[tokio::test]
async fn uncached_requests_always_call_the_vendor() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![hi_there(), hi_there()]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::new(),
        Cache::new(dir.path(), 10),
    );
    collect(&engine, request("hello"), false).await;
    collect(&engine, request("hello"), false).await;
    assert_eq!(vendor.calls(), 2);
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn stopping_early_caches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![hi_there()]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::new(),
        Cache::new(dir.path(), 10),
    );
    let role = DefaultRole::Default.role(&env());
    let mut completion = engine.complete(&role, request("hello"), true).unwrap();
    assert_eq!(completion.next().await.unwrap().unwrap(), "Hi");
    drop(completion);
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn function_call_turn() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![
        vec![
            Chunk::function_call(Some("list_dir".to_string()), None),
            Chunk::function_call(None, Some(r#"{"path": "."}"#.to_string()))
                .with_finish_reason(FinishReason::FunctionCall),
        ],
        vec![Chunk::text("Here are your files.").with_finish_reason(FinishReason::Stop)],
    ]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::with_builtins(),
        Cache::new(dir.path(), 10),
    );
    let functions = Some(engine.functions().schemas());
    let role = DefaultRole::Default.role(&env());
    let mut completion = engine
        .complete(
            &role,
            request("what is here?").with_functions(functions.clone()),
            true,
        )
        .unwrap();
    let mut fragments = Vec::new();
    while let Some(fragment) = completion.next().await {
        fragments.push(fragment.unwrap());
    }
    assert_eq!(fragments, vec!["\n", "Here are your files."]);
    let transcript = completion.transcript().await.unwrap();

    assert_eq!(transcript.len(), 4);
    let call = &transcript[2];
    assert_eq!(call.role, MessageRole::Assistant);
    let declared = call.function_call.as_ref().unwrap();
    assert_eq!(declared.name, "list_dir");
    assert_eq!(declared.arguments, r#"{"path": "."}"#);
    assert_eq!(transcript[3].role, MessageRole::Function);
    assert_eq!(transcript[3].name.as_deref(), Some("list_dir"));
    assert!(transcript[3].content.contains("Cargo.toml"));

    // Exactly one more vendor call, made with the function messages appended.
    let requests = vendor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages, transcript);
    // Only the outer request is cached.
    assert_eq!(engine.cache().len(), 1);
    let replayed = collect(
        &engine,
        request("what is here?").with_functions(functions),
        true,
    )
    .await;
    assert_eq!(replayed, fragments);
    assert_eq!(vendor.calls(), 2);
}

#[tokio::test]
async fn cache_evicts_beyond_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = ScriptedVendor::new(vec![hi_there(), hi_there(), hi_there()]);
    let engine = CompletionEngine::new(
        vendor.clone(),
        FunctionRegistry::new(),
        Cache::new(dir.path(), 2),
    );
    for prompt in ["one", "two", "three"] {
        collect(&engine, request(prompt), true).await;
    }
    assert_eq!(vendor.calls(), 3);
    assert!(engine.cache().len() <= 2);
    // The newest entry always survives eviction.
    collect(&engine, request("three"), true).await;
    assert_eq!(vendor.calls(), 3);
}

#[test]
fn chat_store_round_trip_and_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let store = ChatStore::new(dir.path(), 4);
    let mut messages = vec![Message::system("You are Quill")];
    for i in 0..3 {
        messages.push(Message::user(format!("question {i}")));
        messages.push(Message::assistant(format!("answer {i}")));
    }
    store.write("long", &messages[..4]).unwrap();
    assert_eq!(store.read("long").unwrap(), messages[..4].to_vec());

    store.write("long", &messages).unwrap();
    let stored = store.read("long").unwrap();
    // The oldest kept message is a prompt, never a dangling reply.
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0], messages[0]);
    assert_eq!(stored[1..], messages[5..]);
    assert!(store.read("unknown").unwrap().is_empty());
}

#[test]
fn markdown_printer_redraws_while_streaming() {
    let mut printer = MarkdownPrinter::new(Vec::new())
        .with_width(40)
        .with_refresh(std::time::Duration::ZERO);
    for fragment in ["# Title\n", "body ", "text"] {
        printer.print_fragment(fragment).unwrap();
    }
    assert!(printer.redraws() >= 1);
    printer.finish().unwrap();
    let output = String::from_utf8(printer.get_ref().clone()).unwrap();
    let plain = quill::markdown::strip_ansi(&output);
    assert!(plain.contains("Title"));
    assert!(plain.trim_end().ends_with("body text"));
    assert!(!plain.contains("# Title"));
}
