//! The completion engine.
//!
//! [`CompletionEngine::complete`] turns a request into one lazy stream of text
//! fragments.  Under the hood a request runs as a loop over phases: ask the
//! vendor, stream its chunks, and whenever the model finishes with a function
//! call, run the function, append both messages and ask again.  Only the outer
//! request is wrapped by the response cache.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::{Cache, CachingStream, Fingerprint, FragmentStream};
use crate::error::{Error, Result};
use crate::function::FunctionRegistry;
use crate::role::SystemRole;
use crate::types::{FinishReason, FunctionCall, Message};
use crate::vendor::{ChunkStream, CompletionRequest, Vendor};

/// Drives vendor rounds, function calls and the response cache.
pub struct CompletionEngine<V: Vendor> {
    vendor: Arc<V>,
    functions: Arc<FunctionRegistry>,
    cache: Cache,
    show_function_output: bool,
}

impl<V: Vendor> Clone for CompletionEngine<V> {
    fn clone(&self) -> Self {
        Self {
            vendor: Arc::clone(&self.vendor),
            functions: Arc::clone(&self.functions),
            cache: self.cache.clone(),
            show_function_output: self.show_function_output,
        }
    }
}

impl<V: Vendor + 'static> CompletionEngine<V> {
    pub fn new(vendor: Arc<V>, functions: FunctionRegistry, cache: Cache) -> Self {
        Self {
            vendor,
            functions: Arc::new(functions),
            cache,
            show_function_output: false,
        }
    }

    /// Echo function output into the completion as a fenced block.
    pub fn with_show_function_output(mut self, show: bool) -> Self {
        self.show_function_output = show;
        self
    }

    /// The function registry requests may offer.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// The response cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Start a completion.
    ///
    /// Roles that produce commands or code never see function schemas, whatever
    /// the request offers; this is applied before the request is fingerprinted.
    pub fn complete(
        &self,
        role: &SystemRole,
        mut request: CompletionRequest,
        caching: bool,
    ) -> Result<Completion> {
        if role.disables_functions() {
            request.functions = None;
        }
        let key = Fingerprint::of(&request)?;
        let (transcript_tx, transcript_rx) = oneshot::channel();
        let rounds = Rounds {
            vendor: Arc::clone(&self.vendor),
            functions: Arc::clone(&self.functions),
            request,
            show_function_output: self.show_function_output,
            transcript_tx: Some(transcript_tx),
            phase: Phase::Request,
        };
        let stream = self
            .cache
            .wrap(key, caching, move || rounds.into_stream());
        Ok(Completion {
            stream,
            transcript: transcript_rx,
        })
    }
}

/// One running completion: a stream of text fragments plus its transcript.
pub struct Completion {
    stream: CachingStream,
    transcript: oneshot::Receiver<Vec<Message>>,
}

impl Completion {
    /// Returns true if the fragments are replayed from the cache.
    pub fn is_replay(&self) -> bool {
        self.stream.is_replay()
    }

    /// The request transcript including any function messages.
    ///
    /// Available only for a live completion that ran to the end; a replayed,
    /// failed or abandoned completion yields `None`.
    pub async fn transcript(self) -> Option<Vec<Message>> {
        let Completion { stream, transcript } = self;
        drop(stream);
        transcript.await.ok()
    }
}

impl Stream for Completion {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

enum Phase {
    Request,
    Streaming {
        chunks: ChunkStream,
        call: PendingCall,
    },
    FunctionCall(PendingCall),
    Invoke(PendingCall),
    Done,
    Failed,
}

#[derive(Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

struct Rounds<V> {
    vendor: Arc<V>,
    functions: Arc<FunctionRegistry>,
    request: CompletionRequest,
    show_function_output: bool,
    transcript_tx: Option<oneshot::Sender<Vec<Message>>>,
    phase: Phase,
}

impl<V: Vendor + 'static> Rounds<V> {
    fn into_stream(self) -> FragmentStream {
        Box::pin(stream::unfold(self, |mut rounds| async move {
            let fragment = rounds.next_fragment().await?;
            Some((fragment, rounds))
        }))
    }

    fn fail(&mut self, err: Error) -> Option<Result<String>> {
        self.phase = Phase::Failed;
        Some(Err(err))
    }

    async fn next_fragment(&mut self) -> Option<Result<String>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Request => match self.vendor.complete(&self.request).await {
                    Ok(chunks) => {
                        self.phase = Phase::Streaming {
                            chunks,
                            call: PendingCall::default(),
                        };
                    }
                    Err(err) => return self.fail(err),
                },
                Phase::Streaming { mut chunks, mut call } => match chunks.next().await {
                    Some(Ok(chunk)) => {
                        if let Some(delta) = chunk.function_call {
                            call.name.push_str(delta.name.as_deref().unwrap_or_default());
                            call.arguments
                                .push_str(delta.arguments.as_deref().unwrap_or_default());
                        }
                        self.phase = match chunk.finish_reason {
                            Some(FinishReason::FunctionCall) => Phase::FunctionCall(call),
                            // Dropping the vendor stream here closes the response.
                            Some(_) => Phase::Done,
                            None => Phase::Streaming { chunks, call },
                        };
                        if !chunk.text.is_empty() {
                            return Some(Ok(chunk.text));
                        }
                    }
                    Some(Err(err)) => return self.fail(err),
                    None => self.phase = Phase::Done,
                },
                Phase::FunctionCall(call) => {
                    if call.name.is_empty() {
                        return self.fail(Error::streaming(
                            "vendor requested a function call without a name",
                            None,
                        ));
                    }
                    debug!(
                        function = %call.name,
                        arguments = %call.arguments,
                        "function call requested"
                    );
                    self.request
                        .messages
                        .push(Message::function_call(FunctionCall::new(
                            &call.name,
                            &call.arguments,
                        )));
                    self.phase = Phase::Invoke(call);
                    return Some(Ok("\n".to_string()));
                }
                Phase::Invoke(call) => {
                    match self.functions.invoke(&call.name, &call.arguments).await {
                        Ok(result) => {
                            self.request
                                .messages
                                .push(Message::function_result(&call.name, &result));
                            self.phase = Phase::Request;
                            if self.show_function_output {
                                return Some(Ok(format!("```text\n{result}\n```\n")));
                            }
                        }
                        Err(err) => return self.fail(err),
                    }
                }
                Phase::Done => {
                    if let Some(tx) = self.transcript_tx.take() {
                        let _ = tx.send(self.request.messages.clone());
                    }
                    return None;
                }
                Phase::Failed => {
                    self.phase = Phase::Failed;
                    return None;
                }
            }
        }
    }
}
