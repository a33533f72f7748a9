//! # Interceptor Chains
//!
//! An [`InterceptorChain`] is an ordered list of pure message transformations.
//! Output ports run their outbound chain on every message before delivery and
//! input ports run their inbound chain on every message they hand to the actor.
//!
//! Stages run left to right. The first stage that fails stops the chain and
//! only the send or receive that triggered it is aborted.

use crate::errors::MessageTransformError;
use crate::message::Message;
use std::fmt;
use std::sync::Arc;

pub type TransformFn = dyn Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync;

#[derive(Clone)]
struct Stage {
    name: String,
    transform: Arc<TransformFn>,
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Stage>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage and returns the chain, for builder-style construction.
    pub fn with_stage<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync + 'static,
    {
        self.push(name, transform);
        self
    }

    pub fn push<F>(&mut self, name: impl Into<String>, transform: F)
    where
        F: Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync + 'static,
    {
        self.stages.push(Stage {
            name: name.into(),
            transform: Arc::new(transform),
        });
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Runs `message` through every stage in order.
    pub fn apply(&self, message: Message) -> Result<Message, MessageTransformError> {
        self.stages.iter().try_fold(message, |message, stage| {
            (stage.transform)(message).map_err(|e| e.at_stage(&stage.name))
        })
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

/// A stage that stamps a fixed header on every message.
pub fn set_header(
    name: impl Into<String>,
    value: impl Into<String>,
) -> impl Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync + 'static {
    let name = name.into();
    let value = value.into();
    move |message: Message| Ok(message.with_header(name.clone(), value.clone()))
}

/// A stage that rejects messages whose MIME type differs from `mime_type`.
pub fn require_mime(
    mime_type: impl Into<String>,
) -> impl Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync + 'static {
    let mime_type = mime_type.into();
    move |message: Message| {
        if message.mime_type() == mime_type {
            Ok(message)
        } else {
            Err(MessageTransformError::new(format!(
                "expected {}, got {}",
                mime_type,
                message.mime_type()
            )))
        }
    }
}

/// A stage that rewrites the text body of a message.
pub fn map_text<F>(
    f: F,
) -> impl Fn(Message) -> Result<Message, MessageTransformError> + Send + Sync + 'static
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    move |message: Message| {
        let text = message
            .body_text()
            .map_err(|e| MessageTransformError::new(e.to_string()))?;
        let body = f(text);
        let mime_type = message.mime_type().to_string();
        message
            .with_body(body, mime_type)
            .map_err(|e| MessageTransformError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_apply_left_to_right() {
        let chain = InterceptorChain::new()
            .with_stage("exclaim", map_text(|s| format!("{}!", s)))
            .with_stage("upper", map_text(|s| s.to_uppercase()))
            .with_stage("tag", set_header("seen", "yes"));

        let out = chain.apply(Message::text("hi")).unwrap();
        assert_eq!(out.body_text().unwrap(), "HI!");
        assert_eq!(out.header("seen"), Some("yes"));
    }

    #[test]
    fn test_first_failure_short_circuits() {
        let later_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = later_ran.clone();
        let chain = InterceptorChain::new()
            .with_stage("json-only", require_mime("application/json"))
            .with_stage("never", move |m| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(m)
            });

        let err = chain.apply(Message::text("plain")).unwrap_err();
        assert_eq!(err.stage, "json-only");
        assert!(!later_ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = InterceptorChain::new();
        let message = Message::text("same").with_header("a", "b");
        assert_eq!(chain.apply(message.clone()).unwrap(), message);
        assert!(chain.is_empty());
    }
}
