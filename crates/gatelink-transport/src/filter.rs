//! Filter chains
//!
//! A chain is an ordered list of named stages. Security stages (named
//! `ssl` or `tls`, any case) always sit at the head, in the order they were
//! added. Exactly one codec stage is present: either the one supplied to the
//! builder, kept at its insertion position, or a [`LengthPrefixCodec`]
//! placed first among the non-security stages.
//!
//! Stages ahead of the codec transform the raw byte stream, stages behind it
//! transform whole frame payloads. Outbound data runs the chain in reverse.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

use crate::codec::LengthPrefixCodec;
use crate::error::Result;
use crate::traits::{Filter, FrameCodec};

/// Name given to the codec stage when none is supplied
pub const DEFAULT_CODEC_NAME: &str = "codec";

/// Category of a filter stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Security,
    Codec,
    Other,
}

/// What a stage does to the data passing through it
#[derive(Clone)]
pub enum StageBehavior {
    Transform(Arc<dyn Filter>),
    Codec(Arc<dyn FrameCodec>),
}

/// One named unit of the pipeline
#[derive(Clone)]
pub struct FilterStage {
    name: String,
    kind: StageKind,
    behavior: StageBehavior,
}

impl FilterStage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn behavior(&self) -> &StageBehavior {
        &self.behavior
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Returns true for stage names that must sit at the head of a chain
pub fn is_security_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("ssl") || name.eq_ignore_ascii_case("tls")
}

/// Produces the filter a single connection's chain runs
pub type FilterFactory = Arc<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;

/// Produces the framing implementation a single connection's chain runs
pub type CodecFactory = Arc<dyn Fn() -> Arc<dyn FrameCodec> + Send + Sync>;

#[derive(Clone)]
enum StageSource {
    Filter(FilterFactory),
    Codec(CodecFactory),
}

impl StageSource {
    fn instantiate(&self) -> StageBehavior {
        match self {
            StageSource::Filter(factory) => StageBehavior::Transform(factory()),
            StageSource::Codec(factory) => StageBehavior::Codec(factory()),
        }
    }
}

/// Collects named stages and orders them into a [`FilterChain`].
///
/// The builder is a template: every [`build`](Self::build) asks each
/// stage's factory for a new instance, so connections never share
/// per-connection filter state. Stages added with [`filter`](Self::filter)
/// or [`codec`](Self::codec) hand the same instance to every chain.
#[derive(Default, Clone)]
pub struct FilterChainBuilder {
    stages: Vec<(String, StageSource)>,
}

impl FilterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform stage shared by every chain
    pub fn filter(self, name: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        self.filter_factory(name, move || filter.clone())
    }

    /// Append a transform stage created fresh for every chain
    pub fn filter_factory(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    ) -> Self {
        self.stages
            .push((name.into(), StageSource::Filter(Arc::new(factory))));
        self
    }

    /// Supply the codec stage explicitly. A later call replaces an earlier one.
    pub fn codec(self, name: impl Into<String>, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec_factory(name, move || codec.clone())
    }

    /// Supply a codec stage created fresh for every chain
    pub fn codec_factory(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn FrameCodec> + Send + Sync + 'static,
    ) -> Self {
        self.stages
            .retain(|(_, source)| !matches!(source, StageSource::Codec(_)));
        self.stages
            .push((name.into(), StageSource::Codec(Arc::new(factory))));
        self
    }

    /// Append a stage with any behavior
    pub fn stage(self, name: impl Into<String>, behavior: StageBehavior) -> Self {
        match behavior {
            StageBehavior::Transform(filter) => self.filter(name, filter),
            StageBehavior::Codec(codec) => self.codec(name, codec),
        }
    }

    /// Instantiate every stage and order them into a new chain
    pub fn build(&self) -> FilterChain {
        build_chain(
            self.stages
                .iter()
                .map(|(name, source)| (name.clone(), source.instantiate())),
        )
    }
}

/// Order named stages into a chain. Total over its input.
pub fn build_chain<I, S>(named_stages: I) -> FilterChain
where
    I: IntoIterator<Item = (S, StageBehavior)>,
    S: Into<String>,
{
    let mut security = Vec::new();
    let mut rest = Vec::new();
    let mut codec: Option<Arc<dyn FrameCodec>> = None;

    for (name, behavior) in named_stages {
        let name = name.into();
        let stage = match behavior {
            StageBehavior::Codec(stage_codec) => {
                if codec.is_some() {
                    tracing::warn!("Ignoring extra codec stage '{}'", name);
                    continue;
                }
                codec = Some(stage_codec.clone());
                FilterStage {
                    name,
                    kind: StageKind::Codec,
                    behavior: StageBehavior::Codec(stage_codec),
                }
            }
            StageBehavior::Transform(filter) => {
                let kind = if is_security_name(&name) {
                    StageKind::Security
                } else {
                    StageKind::Other
                };
                FilterStage {
                    name,
                    kind,
                    behavior: StageBehavior::Transform(filter),
                }
            }
        };

        if stage.kind == StageKind::Security {
            security.push(stage);
        } else {
            rest.push(stage);
        }
    }

    let codec = match codec {
        Some(codec) => codec,
        None => {
            let codec: Arc<dyn FrameCodec> = Arc::new(LengthPrefixCodec::new());
            rest.insert(
                0,
                FilterStage {
                    name: DEFAULT_CODEC_NAME.to_string(),
                    kind: StageKind::Codec,
                    behavior: StageBehavior::Codec(codec.clone()),
                },
            );
            codec
        }
    };

    security.extend(rest);
    let codec_index = security
        .iter()
        .position(|stage| stage.kind == StageKind::Codec)
        .unwrap_or(0);

    FilterChain {
        stages: security,
        codec_index,
        codec,
    }
}

/// An ordered pipeline with exactly one codec stage
#[derive(Clone)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
    codec_index: usize,
    codec: Arc<dyn FrameCodec>,
}

impl FilterChain {
    /// Chain holding only the default codec stage
    pub fn codec_only() -> Self {
        FilterChainBuilder::new().build()
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The codec stage's framing implementation
    pub fn codec(&self) -> &Arc<dyn FrameCodec> {
        &self.codec
    }

    pub fn set_max_read_size(&self, max: usize) {
        self.codec.set_max_read_size(max);
    }

    /// Run a raw chunk read from the socket through the stream stages
    pub fn inbound_chunk(&self, chunk: Bytes) -> Result<Bytes> {
        self.stages[..self.codec_index]
            .iter()
            .try_fold(chunk, |data, stage| apply_inbound(stage, data))
    }

    /// Take the next frame out of `buf` and run it through the frame stages
    pub fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some(frame) = self.codec.decode_frame(buf)? else {
            return Ok(None);
        };

        self.stages[self.codec_index + 1..]
            .iter()
            .try_fold(frame, |data, stage| apply_inbound(stage, data))
            .map(Some)
    }

    /// Turn an application payload into bytes ready for the socket
    pub fn outbound(&self, payload: Bytes) -> Result<Bytes> {
        let framed_payload = self.stages[self.codec_index + 1..]
            .iter()
            .rev()
            .try_fold(payload, |data, stage| apply_outbound(stage, data))?;

        let frame = self.codec.encode_frame(framed_payload)?;

        self.stages[..self.codec_index]
            .iter()
            .rev()
            .try_fold(frame, |data, stage| apply_outbound(stage, data))
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.names())
            .field("codec_index", &self.codec_index)
            .finish()
    }
}

fn apply_inbound(stage: &FilterStage, data: Bytes) -> Result<Bytes> {
    match &stage.behavior {
        StageBehavior::Transform(filter) => filter.inbound(data),
        StageBehavior::Codec(_) => Ok(data),
    }
}

fn apply_outbound(stage: &FilterStage, data: Bytes) -> Result<Bytes> {
    match &stage.behavior {
        StageBehavior::Transform(filter) => filter.outbound(data),
        StageBehavior::Codec(_) => Ok(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Filter for Passthrough {
        fn inbound(&self, data: Bytes) -> Result<Bytes> {
            Ok(data)
        }

        fn outbound(&self, data: Bytes) -> Result<Bytes> {
            Ok(data)
        }
    }

    fn pass() -> Arc<dyn Filter> {
        Arc::new(Passthrough)
    }

    #[test]
    fn test_empty_builder_yields_codec_only() {
        let chain = FilterChainBuilder::new().build();
        assert_eq!(chain.names(), vec![DEFAULT_CODEC_NAME]);
        assert_eq!(chain.stages()[0].kind(), StageKind::Codec);
    }

    #[test]
    fn test_security_names_case_insensitive() {
        assert!(is_security_name("ssl"));
        assert!(is_security_name("TLS"));
        assert!(is_security_name("Ssl"));
        assert!(!is_security_name("tls2"));
        assert!(!is_security_name("codec"));
    }

    #[test]
    fn test_tls_moves_to_head() {
        let chain = FilterChainBuilder::new()
            .filter("a", pass())
            .filter("b", pass())
            .filter("tls", pass())
            .build();

        assert_eq!(chain.names(), vec!["tls", "codec", "a", "b"]);
        assert_eq!(chain.stages()[0].kind(), StageKind::Security);
        assert_eq!(chain.stages()[2].kind(), StageKind::Other);
    }

    #[test]
    fn test_build_instantiates_stages_per_chain() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let made = Arc::new(AtomicUsize::new(0));
        let counter = made.clone();
        let template = FilterChainBuilder::new().filter_factory("tls", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            pass()
        });

        let first = template.build();
        let second = template.build();

        assert_eq!(made.load(Ordering::SeqCst), 2);
        assert_eq!(first.names(), second.names());
        assert!(!Arc::ptr_eq(first.codec(), second.codec()));
    }

    #[test]
    fn test_explicit_codec_keeps_position() {
        let chain = FilterChainBuilder::new()
            .filter("zip", pass())
            .codec("frames", Arc::new(LengthPrefixCodec::new()))
            .filter("SSL", pass())
            .build();

        assert_eq!(chain.names(), vec!["SSL", "zip", "frames"]);
        assert_eq!(chain.stages()[2].kind(), StageKind::Codec);
    }
}
