//! Declarative wiring of sub-operators into a shared stream name space.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::operators::{Operator, OperatorKind, Streams};
use crate::params::{Params, map_keys};

/// One sub-operator of a compound: its kind plus the maps re-keying its
/// local parameter and stream names into the shared name space.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub kind: OperatorKind,
    pub param_map: BTreeMap<String, String>,
    pub stream_map: BTreeMap<String, String>,
}

impl OperatorConfig {
    pub fn new(kind: OperatorKind) -> Self {
        Self {
            kind,
            param_map: BTreeMap::new(),
            stream_map: BTreeMap::new(),
        }
    }

    /// Adds `(local, shared)` parameter name pairs.
    pub fn params<const N: usize>(mut self, entries: [(&str, &str); N]) -> Self {
        for (local, shared) in entries {
            self.param_map.insert(local.to_string(), shared.to_string());
        }
        self
    }

    /// Adds `(local, shared)` stream name pairs.
    pub fn streams<const N: usize>(mut self, entries: [(&str, &str); N]) -> Self {
        for (local, shared) in entries {
            self.stream_map
                .insert(local.to_string(), shared.to_string());
        }
        self
    }
}

/// Wires a list of [OperatorConfig]s against a shared stream bag.  Streams
/// named only between sub-operators are allocated here, typed by the
/// declaring operator's signature; the declared order is the execution
/// order.
pub struct CompoundOperator {
    operators: Vec<(OperatorKind, Box<dyn Operator>)>,
}

impl std::fmt::Debug for CompoundOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundOperator")
            .field("operators", &self.operators.iter().map(|(kind, _)| kind).collect::<Vec<_>>())
            .finish()
    }
}

impl CompoundOperator {
    pub fn new(configs: &[OperatorConfig], params: &Params, streams: &Streams) -> Result<Self> {
        let mut wired = streams.handles();
        for config in configs {
            for (local, shared) in &config.stream_map {
                let stream_type = config
                    .kind
                    .stream_type_of(local)
                    .unwrap_or(crate::operators::StreamType::Float);
                wired
                    .ensure(shared, stream_type)
                    .map_err(|e| e.in_operator(config.kind.operator_name()))?;
            }
        }
        let mut operators = Vec::with_capacity(configs.len());
        for config in configs {
            let sub_params = map_keys(params, &config.param_map);
            let mut sub_streams = Streams::default();
            for (local, shared) in &config.stream_map {
                if let Some(stream) = wired.get(shared) {
                    sub_streams.insert(local.clone(), stream.handle());
                }
            }
            let operator = config
                .kind
                .build(&sub_params, &sub_streams)
                .map_err(|e| e.in_operator(config.kind.operator_name()))?;
            operators.push((config.kind, operator));
        }
        Ok(Self { operators })
    }
}

impl Operator for CompoundOperator {
    fn calc(&mut self) -> Result<()> {
        for (kind, operator) in &mut self.operators {
            operator
                .calc()
                .map_err(|e| e.in_operator(kind.operator_name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{AnyStream, StreamType};
    use crate::params::params_from;
    use crate::stream::Stream;
    use serde_json::json;

    #[test]
    fn compound_allocates_typed_intermediates() {
        let mut streams = Streams::default();
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("out", AnyStream::Float(Stream::new()));
        let source = streams.float("source").unwrap();
        let out = streams.float("out").unwrap();

        // delta feeds a half-wave split through an intermediate stream
        let configs = [
            OperatorConfig::new(OperatorKind::Delta)
                .streams([("source", "source"), ("target", "delta")]),
            OperatorConfig::new(OperatorKind::HwSplit).streams([
                ("source", "delta"),
                ("positive", "out"),
                ("negative", "drop"),
            ]),
        ];
        let mut compound = CompoundOperator::new(&configs, &Params::new(), &streams).unwrap();
        source.extend([Some(1.0), Some(3.0), Some(2.0)]);
        compound.calc().unwrap();
        assert_eq!(out.tail(0), vec![None, Some(2.0), Some(0.0)]);
        // the intermediate never leaks into the caller's bag
        assert!(!streams.contains("delta"));
    }

    #[test]
    fn compound_rekeys_params() {
        let mut streams = Streams::default();
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("out", AnyStream::Float(Stream::new()));
        let source = streams.float("source").unwrap();
        let configs = [OperatorConfig::new(OperatorKind::Sma)
            .params([("lag", "Mean.lag")])
            .streams([("source", "source"), ("target", "out")])];
        let params = params_from([("Mean.lag", json!(2))]);
        let mut compound = CompoundOperator::new(&configs, &params, &streams).unwrap();
        source.extend([Some(1.0), Some(3.0)]);
        compound.calc().unwrap();
        assert_eq!(
            streams.float("out").unwrap().tail(0),
            vec![Some(1.0), Some(2.0)]
        );
    }

    #[test]
    fn conflicting_stream_types_are_rejected() {
        let streams = Streams::default();
        // fractal emits indexes; feeding them to diff as floats must fail
        let configs = [
            OperatorConfig::new(OperatorKind::FractalEx)
                .streams([("source", "price"), ("minIndexes", "mins"), ("maxIndexes", "maxs")]),
            OperatorConfig::new(OperatorKind::Diff).streams([
                ("source1", "mins"),
                ("source2", "maxs"),
                ("target", "bad"),
            ]),
        ];
        let err = CompoundOperator::new(&configs, &Params::new(), &streams).unwrap_err();
        assert!(err.to_string().contains("DiffOperator"));
    }

    #[test]
    fn ensure_reports_type_clash() {
        let mut streams = Streams::default();
        streams.insert("x", AnyStream::Float(Stream::new()));
        assert!(streams.ensure("x", StreamType::Float).is_ok());
        assert!(streams.ensure("x", StreamType::Index).is_err());
    }
}
