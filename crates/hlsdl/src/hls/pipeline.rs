//! # Segment stage pipeline
//!
//! A [`SegmentPipeline`] chains [`ByteStage`]s between a segment's response
//! stream and a [`MemoryWriter`]. Chunks flow left to right; when the source
//! ends every stage is finished in order and may flush trailing output into
//! the stages after it.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::buffer::MemoryWriter;
use crate::error::DownloadError;

/// One transformation step over a segment's bytes.
pub trait ByteStage: Send {
    fn name(&self) -> &'static str;

    /// Transform one chunk, forwarding any produced bytes to `output`.
    fn process(
        &mut self,
        chunk: Bytes,
        output: &mut dyn FnMut(Bytes) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError>;

    /// Flush buffered state once the input has ended.
    fn finish(
        &mut self,
        output: &mut dyn FnMut(Bytes) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError>;
}

/// Ordered list of stages applied to a segment body.
#[derive(Default)]
pub struct SegmentPipeline {
    stages: Vec<Box<dyn ByteStage>>,
}

impl SegmentPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage to the end of the chain.
    pub fn add_stage<S: ByteStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push_boxed(&mut self, stage: Box<dyn ByteStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drive `source` through every stage into `sink`.
    ///
    /// The first error from the source, a stage, or the sink ends the run.
    pub async fn run<S, E>(mut self, mut source: S, sink: &mut MemoryWriter) -> Result<(), DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<DownloadError>,
    {
        fn process_inner(
            stages: &mut [Box<dyn ByteStage>],
            data: Bytes,
            output: &mut dyn FnMut(Bytes) -> Result<(), DownloadError>,
        ) -> Result<(), DownloadError> {
            if let Some((first, rest)) = stages.split_first_mut() {
                let mut intermediate_output = |data| process_inner(rest, data, output);
                first.process(data, &mut intermediate_output)
            } else {
                output(data)
            }
        }

        let mut write = |data: Bytes| sink.write(data).map_err(DownloadError::from);

        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(Into::into)?;
            process_inner(&mut self.stages, chunk, &mut write)?;
        }

        let mut stages = &mut self.stages[..];
        while let Some((current, rest)) = stages.split_first_mut() {
            let mut output_fn = |data: Bytes| process_inner(rest, data, &mut write);
            current.finish(&mut output_fn)?;
            stages = rest;
        }
        Ok(())
    }
}
