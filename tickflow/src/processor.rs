//! Declarative graph assembly and chunked execution.

use std::rc::Rc;

use chrono::NaiveDateTime;
use serde_json::json;

use crate::error::{Error, Result};
use crate::operators::{AnyStream, CompoundOperator, Operator, OperatorConfig, Streams};
use crate::params::{Params, merge_defaults};
use crate::stream::Stream;
use crate::types::GraphType;

pub const SOURCE_PRICE: &str = "Price";
pub const SOURCE_VOLUME: &str = "Volume";
pub const SOURCE_TIME: &str = "Time";

/// The graph selection parameter: a comma-separated include/exclude glob
/// list, entries starting with `-` excluding.
pub const PARAM_GRAPHS: &str = "(Graphs)";

/// One derived series exposed to the caller.
#[derive(Clone, Debug)]
pub struct GraphConfig {
    pub name: String,
    pub title: String,
    pub graph_type: GraphType,
}

impl GraphConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            graph_type: GraphType::Line,
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn rendered_as(mut self, graph_type: GraphType) -> Self {
        self.graph_type = graph_type;
        self
    }
}

/// A named, reusable processor blueprint: the exposed graphs, the operator
/// DAG and the parameter defaults/constants.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    name: String,
    graph_configs: Vec<GraphConfig>,
    operator_configs: Vec<OperatorConfig>,
    default_params: Params,
    constant_params: Params,
}

impl ProcessorConfig {
    pub fn new(
        name: &str,
        graph_configs: Vec<GraphConfig>,
        operator_configs: Vec<OperatorConfig>,
    ) -> Self {
        Self {
            name: name.to_string(),
            graph_configs,
            operator_configs,
            default_params: Params::new(),
            constant_params: Params::new(),
        }
    }

    pub fn with_default_params(mut self, params: Params) -> Self {
        self.default_params = params;
        self
    }

    pub fn with_constant_params(mut self, params: Params) -> Self {
        self.constant_params = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph_configs(&self) -> &[GraphConfig] {
        &self.graph_configs
    }

    pub fn default_params(&self) -> &Params {
        &self.default_params
    }
}

/// One returned row per selected graph: the first changed index relative
/// to the chunk start (negative after retroaction) and the values from
/// there to the end of the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct CalcRow {
    pub offset: i64,
    pub values: Vec<Option<f64>>,
}

// Minimal `*`/`?` glob matching, iterative with star backtracking.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

fn selected(name: &str, enabled: &[String], disabled: &[String]) -> bool {
    (enabled.is_empty() || enabled.iter().any(|glob| glob_match(glob, name)))
        && !disabled.iter().any(|glob| glob_match(glob, name))
}

/// A live instance of a [ProcessorConfig]: owns the input and graph
/// streams, the wired operator graph and the per-handle read cursors that
/// turn retroactive edits into negative row offsets.
pub struct Processor {
    config: Rc<ProcessorConfig>,
    caller_params: Params,
    params: Params,
    streams: Streams,
    price: Stream<f64>,
    volume: Stream<f64>,
    time: Stream<NaiveDateTime>,
    graph_slots: Vec<Option<String>>,
    operators: CompoundOperator,
}

impl Processor {
    pub fn new(
        config: Rc<ProcessorConfig>,
        interval: i64,
        class_code: &str,
        sec_code: &str,
    ) -> Result<Self> {
        let mut caller_params = Params::new();
        caller_params.insert("interval".to_string(), json!(interval));
        caller_params.insert("classCode".to_string(), json!(class_code));
        caller_params.insert("secCode".to_string(), json!(sec_code));
        Self::with_params(config, caller_params)
    }

    pub fn with_params(config: Rc<ProcessorConfig>, caller_params: Params) -> Result<Self> {
        let mut params = merge_defaults(&caller_params, config.default_params())?;
        // constants always win; a caller cannot override them
        for (key, value) in &config.constant_params {
            params.insert(key.clone(), value.clone());
        }

        let mut streams = Streams::default();
        streams.insert(SOURCE_PRICE, AnyStream::Float(Stream::new()));
        streams.insert(SOURCE_VOLUME, AnyStream::Float(Stream::new()));
        streams.insert(SOURCE_TIME, AnyStream::Time(Stream::new()));
        for graph in config.graph_configs() {
            // a graph may expose an input stream directly (e.g. Price)
            if !streams.contains(&graph.name) {
                streams.insert(graph.name.clone(), AnyStream::Float(Stream::new()));
            }
        }
        for (_, stream) in streams.iter() {
            stream.rewind_on_change();
        }

        let operators = CompoundOperator::new(&config.operator_configs, &params, &streams)?;

        let graphs_param = match params.get(PARAM_GRAPHS) {
            Some(value) => value
                .as_str()
                .ok_or_else(|| Error::param(format!("{PARAM_GRAPHS} is not a string")))?
                .to_string(),
            None => String::new(),
        };
        let globs: Vec<&str> = graphs_param
            .split(',')
            .map(str::trim)
            .filter(|glob| !glob.is_empty())
            .collect();
        let enabled: Vec<String> = globs
            .iter()
            .filter(|glob| !glob.starts_with('-'))
            .map(|glob| glob.to_string())
            .collect();
        let disabled: Vec<String> = globs
            .iter()
            .filter(|glob| glob.starts_with('-'))
            .map(|glob| glob.trim_start_matches(['-', ' ']).to_string())
            .collect();
        let graph_slots = config
            .graph_configs()
            .iter()
            .map(|graph| {
                selected(&graph.name, &enabled, &disabled).then(|| graph.name.clone())
            })
            .collect();

        let price = streams
            .get(SOURCE_PRICE)
            .and_then(AnyStream::as_float)
            .expect("price source")
            .handle();
        let volume = streams
            .get(SOURCE_VOLUME)
            .and_then(AnyStream::as_float)
            .expect("volume source")
            .handle();
        let time = match streams.get(SOURCE_TIME) {
            Some(AnyStream::Time(stream)) => stream.handle(),
            _ => unreachable!("time source"),
        };

        Ok(Self {
            config,
            caller_params,
            params,
            streams,
            price,
            volume,
            time,
            graph_slots,
            operators,
        })
    }

    pub fn config_name(&self) -> &str {
        self.config.name()
    }

    /// Descriptors of every configured graph, in slot order.
    pub fn descrs(&self) -> &[GraphConfig] {
        self.config.graph_configs()
    }

    pub fn default_params(&self) -> &Params {
        self.config.default_params()
    }

    /// The effective parameters after defaults and constants.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Structural clone with updated params and fresh streams; the old
    /// handle is discarded by the caller.
    pub fn copy_with_params(&self, params: Params) -> Result<Processor> {
        let mut caller_params = self.caller_params.clone();
        caller_params.extend(params);
        Self::with_params(self.config.clone(), caller_params)
    }

    /// Feeds one chunk through the graph.  Returns one row per graph
    /// slot; disabled slots yield none.
    pub fn calc_values(
        &mut self,
        price: Vec<Option<f64>>,
        volume: Vec<Option<f64>>,
        time: Vec<Option<NaiveDateTime>>,
    ) -> Result<Vec<Option<CalcRow>>> {
        if price.len() != volume.len() || price.len() != time.len() {
            return Err(Error::param("input data chunks are of different lengths"));
        }

        let start = self.price.len();
        if self.streams.iter().any(|(_, stream)| stream.len() != start) {
            return Err(Error::value("data streams are out of sync"));
        }

        self.price.extend(price);
        self.volume.extend(volume);
        self.time.extend(time);

        for (_, stream) in self.streams.iter() {
            stream.set_pos(start);
        }

        self.operators.calc()?;

        let len = self.price.len();
        if self.streams.iter().any(|(_, stream)| stream.len() != len) {
            return Err(Error::value("data streams ran out of sync"));
        }

        Ok(self
            .graph_slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|name| {
                    let stream = self
                        .streams
                        .get(name)
                        .and_then(AnyStream::as_float)
                        .expect("graph streams are floats");
                    let pos = stream.pos();
                    CalcRow {
                        offset: pos as i64 - start as i64,
                        values: stream.tail(pos),
                    }
                })
            })
            .collect())
    }
}
