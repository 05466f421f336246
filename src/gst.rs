//! GStreamer appsink binding
//!
//! Builds a pipeline from a gst-launch description, looks up the named
//! appsink and routes its EOS, preroll and new-sample callbacks into a
//! [`VideoSource`]. A synchronous bus handler forwards errors and EOS on the
//! posting thread, so a consumer blocked in capture is woken even after the
//! pipeline stops producing samples.

use crate::capture::{CapturedFrame, FrameSource, MappableSample, PipelineEvent, StreamCaps};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::gpu::GpuBackend;
use crate::processing::StagedFrame;
use crate::source::VideoSource;
use crate::types::Geometry;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use std::sync::Arc;
use std::time::Duration;

impl MappableSample for gst::Sample {
    type Mapping<'a> = gst::BufferMap<'a, gst::buffer::Readable>;

    fn map_readable(&self) -> Result<Self::Mapping<'_>> {
        let buffer = self
            .buffer()
            .ok_or_else(|| Error::Mapping("sample had no buffer".into()))?;
        buffer
            .map_readable()
            .map_err(|e| Error::Mapping(format!("gst_buffer_map() failed: {}", e)))
    }

    fn stream_caps(&self) -> Result<StreamCaps> {
        let caps = self
            .caps()
            .ok_or_else(|| Error::Mapping("sample had no caps".into()))?;
        let structure = caps
            .structure(0)
            .ok_or_else(|| Error::Mapping("caps had no structure".into()))?;

        let width = structure
            .get::<i32>("width")
            .map_err(|e| Error::Mapping(format!("caps missing width: {}", e)))?;
        let height = structure
            .get::<i32>("height")
            .map_err(|e| Error::Mapping(format!("caps missing height: {}", e)))?;
        let format = structure.get::<&str>("format").ok().map(str::to_owned);

        Ok(StreamCaps {
            width,
            height,
            format,
        })
    }
}

/// GStreamer-driven video source
pub struct GstVideo<B: GpuBackend> {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    source: Arc<VideoSource<B>>,
}

impl<B: GpuBackend> GstVideo<B> {
    /// Parse `config.pipeline` and attach to its appsink. The pipeline is
    /// left in the Null state until [`open`](Self::open).
    pub fn create(config: SourceConfig, backend: B) -> Result<Self> {
        gst::init().map_err(|e| Error::Pipeline(format!("Failed to initialize GStreamer: {}", e)))?;

        tracing::info!("Creating pipeline: {}", config.pipeline);
        let pipeline = gst::parse::launch(&config.pipeline)
            .map_err(|e| Error::Pipeline(format!("Failed to parse pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::Pipeline("launch description is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name(&config.appsink_name)
            .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| {
                Error::Pipeline(format!("no appsink named '{}' in pipeline", config.appsink_name))
            })?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| Error::Pipeline("pipeline has no bus".into()))?;

        let source = Arc::new(VideoSource::new(config, backend)?);
        install_callbacks(&appsink, &source);
        install_bus_handler(&bus, &source);

        Ok(Self {
            pipeline,
            bus,
            source,
        })
    }

    /// Shared handle to the underlying source
    pub fn source(&self) -> &Arc<VideoSource<B>> {
        &self.source
    }

    pub fn open(&self) -> Result<()> {
        self.source.open();
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::Pipeline(format!("Failed to start pipeline: {}", e)))?;
        tracing::info!("Pipeline playing");
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let result = self.pipeline.set_state(gst::State::Null);
        self.source.close();
        result.map_err(|e| Error::Pipeline(format!("Failed to stop pipeline: {}", e)))?;
        tracing::info!("Pipeline stopped");
        Ok(())
    }

    pub fn capture(&self, timeout: Option<Duration>) -> Result<CapturedFrame<B::Mapped>> {
        self.source.capture(timeout)
    }

    pub fn convert(&self, frame: &CapturedFrame<B::Mapped>) -> Result<StagedFrame<B::Staging>> {
        self.source.convert(frame)
    }
}

impl<B: GpuBackend> FrameSource for GstVideo<B> {
    type Backend = B;

    fn open(&self) -> Result<()> {
        GstVideo::open(self)
    }

    fn close(&self) -> Result<()> {
        GstVideo::close(self)
    }

    fn capture(&self, timeout: Option<Duration>) -> Result<CapturedFrame<B::Mapped>> {
        GstVideo::capture(self, timeout)
    }

    fn convert(&self, frame: &CapturedFrame<B::Mapped>) -> Result<StagedFrame<B::Staging>> {
        GstVideo::convert(self, frame)
    }

    fn is_open(&self) -> bool {
        self.source.is_open()
    }

    fn geometry(&self) -> Option<Geometry> {
        self.source.geometry()
    }
}

impl<B: GpuBackend> Drop for GstVideo<B> {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        self.bus.unset_sync_handler();
        self.source.close();
    }
}

fn install_callbacks<B: GpuBackend>(appsink: &gst_app::AppSink, source: &Arc<VideoSource<B>>) {
    let on_eos = source.clone();
    let on_preroll = source.clone();
    let on_sample = source.clone();

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .eos(move |_| on_eos.on_end_of_stream())
            .new_preroll(move |_| {
                on_preroll.on_preroll();
                Ok(gst::FlowSuccess::Ok)
            })
            .new_sample(move |sink| {
                match sink.pull_sample() {
                    // failures are logged and counted by the source
                    Ok(sample) => {
                        let _ = on_sample.on_buffer(&sample);
                    }
                    Err(_) => tracing::warn!("gst_app_sink_pull_sample() returned no sample"),
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}

fn install_bus_handler<B: GpuBackend>(bus: &gst::Bus, source: &Arc<VideoSource<B>>) {
    let source = source.clone();
    bus.set_sync_handler(move |_, message| {
        if let Some(event) = event_from_message(message) {
            source.handle_event(event);
        }
        // nothing pops the bus, so don't let messages queue up
        gst::BusSyncReply::Drop
    });
}

fn event_from_message(message: &gst::Message) -> Option<PipelineEvent> {
    use gst::MessageView;

    match message.view() {
        MessageView::Eos(..) => Some(PipelineEvent::EndOfStream),
        MessageView::Error(err) => Some(PipelineEvent::Error(match err.debug() {
            Some(debug) => format!("{} ({})", err.error(), debug),
            None => err.error().to_string(),
        })),
        MessageView::Warning(warning) => Some(PipelineEvent::Warning(warning.error().to_string())),
        MessageView::StateChanged(change) => Some(PipelineEvent::StateChanged {
            from: format!("{:?}", change.old()),
            to: format!("{:?}", change.current()),
        }),
        _ => None,
    }
}
