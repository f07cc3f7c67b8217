//! Plot functions and their registry.
//!
//! A plot function builds the [`Figure`] a plot worker displays. Thread
//! workers can run any closure; process workers only receive a name and
//! JSON arguments, so functions they run must be registered in the
//! worker executable's [`PlotRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::bail;
use playplot_core::AudioData;
use serde_json::Value;

use super::headless::HeadlessSurface;
use super::surface::{Axis, Figure};
use crate::error::WorkerFailure;

/// Name of the built-in headless plot.
pub const HEADLESS_PLOT: &str = "headless";

/// Inputs available to a plot function.
#[derive(Debug, Clone)]
pub struct PlotContext {
    /// Index of the plot within its session
    pub index: usize,
    pub worker_id: String,
    /// Clip duration in seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub audio: AudioData,
    /// Caller arguments (`Null` for inline functions)
    pub args: Value,
}

impl PlotContext {
    pub fn new(index: usize, worker_id: impl Into<String>, audio: AudioData, args: Value) -> Self {
        Self {
            index,
            worker_id: worker_id.into(),
            duration: audio.duration(),
            sample_rate: audio.sample_rate(),
            channels: audio.channels(),
            audio,
            args,
        }
    }

    /// String argument `key`, if present.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer argument `key`, if present.
    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }
}

/// Builds the figure of a plot worker.
pub trait PlotFunction: Send + Sync {
    /// # Errors
    ///
    /// Any error is relayed to the session as a plot worker failure.
    fn build(&self, ctx: &PlotContext) -> anyhow::Result<Figure>;
}

impl<F> PlotFunction for F
where
    F: Fn(&PlotContext) -> anyhow::Result<Figure> + Send + Sync,
{
    fn build(&self, ctx: &PlotContext) -> anyhow::Result<Figure> {
        self(ctx)
    }
}

/// How a session refers to the plot function of one plot.
#[derive(Clone)]
pub enum PlotBinding {
    /// A function object, usable with thread isolation only.
    Inline(Arc<dyn PlotFunction>),
    /// A registered function looked up by name, with JSON arguments.
    Named { name: String, args: Value },
}

impl PlotBinding {
    pub fn inline(function: impl PlotFunction + 'static) -> Self {
        Self::Inline(Arc::new(function))
    }

    pub fn named(name: impl Into<String>, args: Value) -> Self {
        Self::Named {
            name: name.into(),
            args,
        }
    }

    /// Arguments handed to the function.
    pub fn args(&self) -> Value {
        match self {
            Self::Inline(_) => Value::Null,
            Self::Named { args, .. } => args.clone(),
        }
    }

    /// Finds the function to run.
    ///
    /// # Errors
    ///
    /// Returns `WorkerFailure::UnknownPlotFunction` for an unregistered name.
    pub fn resolve(&self, registry: &PlotRegistry) -> Result<Arc<dyn PlotFunction>, WorkerFailure> {
        match self {
            Self::Inline(function) => Ok(Arc::clone(function)),
            Self::Named { name, .. } => registry
                .get(name)
                .ok_or_else(|| WorkerFailure::UnknownPlotFunction(name.clone())),
        }
    }
}

impl fmt::Debug for PlotBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(..)"),
            Self::Named { name, args } => f
                .debug_struct("Named")
                .field("name", name)
                .field("args", args)
                .finish(),
        }
    }
}

/// Named plot functions available to workers.
#[derive(Clone, Default)]
pub struct PlotRegistry {
    functions: HashMap<String, Arc<dyn PlotFunction>>,
}

impl PlotRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(HEADLESS_PLOT, headless_plot);
        registry
    }

    /// Registers `function` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, function: impl PlotFunction + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlotFunction>> {
        self.functions.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for PlotRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlotRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Diagnostic plot without a display.
///
/// Arguments:
/// - `title`: figure title
/// - `fail`: fail building the figure with this message
/// - `close_after_frames`: close the surface after this many frames
fn headless_plot(ctx: &PlotContext) -> anyhow::Result<Figure> {
    if let Some(reason) = ctx.arg_str("fail") {
        bail!("{reason}");
    }
    let (surface, probe) = HeadlessSurface::new();
    if let Some(frames) = ctx.arg_u64("close_after_frames") {
        probe.close_after_frames(frames);
    }
    let title = ctx
        .arg_str("title")
        .map(str::to_string)
        .unwrap_or_else(|| format!("Fig {}", ctx.index));
    Ok(Figure::new(Box::new(surface))
        .title(title)
        .axis(Axis::new("time [s]", 0.0, ctx.duration)))
}
