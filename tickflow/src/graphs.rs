//! Built-in processor configurations.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::json;

use crate::operators::{OperatorConfig, OperatorKind};
use crate::params::params_from;
use crate::processor::{GraphConfig, PARAM_GRAPHS, ProcessorConfig};
use crate::types::GraphType;

/// The named configuration registry served over the API.
pub fn builtin_configs() -> BTreeMap<String, Rc<ProcessorConfig>> {
    [sandbox_config(), trading_config()]
        .into_iter()
        .map(|config| (config.name().to_string(), Rc::new(config)))
        .collect()
}

/// Moving extrema and fractal peaks over raw price, for eyeballing the
/// peak detector.
pub fn sandbox_config() -> ProcessorConfig {
    ProcessorConfig::new(
        "sandbox",
        vec![
            GraphConfig::new("MovingMax"),
            GraphConfig::new("MovingMin"),
            GraphConfig::new("Maxs").rendered_as(GraphType::PeakUp),
            GraphConfig::new("Mins").rendered_as(GraphType::PeakDown),
            GraphConfig::new("DiscardedMaxs").rendered_as(GraphType::PeakUp),
            GraphConfig::new("DiscardedMins").rendered_as(GraphType::PeakDown),
        ],
        vec![
            OperatorConfig::new(OperatorKind::MinMax)
                .params([("lag", "minMaxLag")])
                .streams([
                    ("source", "Price"),
                    ("max", "MovingMax"),
                    ("min", "MovingMin"),
                ]),
            OperatorConfig::new(OperatorKind::FractalEx)
                .params([
                    ("width", "peakWidth"),
                    ("threshold", "peakThreshold"),
                    ("minMaxLag", "minMaxLag"),
                ])
                .streams([
                    ("source", "Price"),
                    ("maxIndexes", "maxIndexes"),
                    ("minIndexes", "minIndexes"),
                    ("discardedMaxIndexes", "discardedMaxIndexes"),
                    ("discardedMinIndexes", "discardedMinIndexes"),
                ]),
            OperatorConfig::new(OperatorKind::Pick).streams([
                ("source", "Price"),
                ("indexes", "maxIndexes"),
                ("target", "Maxs"),
            ]),
            OperatorConfig::new(OperatorKind::Pick).streams([
                ("source", "Price"),
                ("indexes", "minIndexes"),
                ("target", "Mins"),
            ]),
            OperatorConfig::new(OperatorKind::Pick).streams([
                ("source", "Price"),
                ("indexes", "discardedMaxIndexes"),
                ("target", "DiscardedMaxs"),
            ]),
            OperatorConfig::new(OperatorKind::Pick).streams([
                ("source", "Price"),
                ("indexes", "discardedMinIndexes"),
                ("target", "DiscardedMins"),
            ]),
        ],
    )
    .with_default_params(params_from([
        (PARAM_GRAPHS, json!("Maxs, Mins")),
        ("minMaxLag", json!(30)),
        ("peakWidth", json!(3)),
        ("peakThreshold", json!(0.0)),
    ]))
}

/// The full divergence pipeline: adaptive averages over price and RSI,
/// fractal peaks on both, divergence detection per peak polarity, plotted
/// lines and the trading sink on the bearish stream.
pub fn trading_config() -> ProcessorConfig {
    let mut operator_configs = vec![
        OperatorConfig::new(OperatorKind::Kama)
            .params([
                ("kerLag", "PriceKama.kerLag"),
                ("fastLag", "PriceKama.fastLag"),
                ("slowLag", "PriceKama.slowLag"),
            ])
            .streams([("source", "Price"), ("target", "PriceKama")]),
        OperatorConfig::new(OperatorKind::Rsi)
            .params([("lag", "Rsi.lag")])
            .streams([("source", "Price"), ("target", "Rsi")]),
        OperatorConfig::new(OperatorKind::Kama)
            .params([
                ("kerLag", "RsiKama.kerLag"),
                ("fastLag", "RsiKama.fastLag"),
                ("slowLag", "RsiKama.slowLag"),
            ])
            .streams([("source", "Rsi"), ("target", "RsiKama")]),
        OperatorConfig::new(OperatorKind::FractalEx)
            .params([
                ("width", "V1.peakWidth"),
                ("threshold", "V1.peakThreshold"),
                ("minMaxLag", "V1.peakMinMaxLag"),
            ])
            .streams([
                ("source", "PriceKama"),
                ("maxIndexes", "V1.maxIndexes"),
                ("minIndexes", "V1.minIndexes"),
                ("discardedMaxIndexes", "V1.discardedMaxIndexes"),
                ("discardedMinIndexes", "V1.discardedMinIndexes"),
            ]),
        OperatorConfig::new(OperatorKind::FractalEx)
            .params([
                ("width", "V2.peakWidth"),
                ("threshold", "V2.peakThreshold"),
                ("minMaxLag", "V2.peakMinMaxLag"),
            ])
            .streams([
                ("source", "RsiKama"),
                ("maxIndexes", "V2.maxIndexes"),
                ("minIndexes", "V2.minIndexes"),
                ("discardedMaxIndexes", "V2.discardedMaxIndexes"),
                ("discardedMinIndexes", "V2.discardedMinIndexes"),
            ]),
        // one divergence detector per peak polarity: maximums carry the
        // bearish signal, minimums the bullish one
        OperatorConfig::new(OperatorKind::Divergence)
            .params([
                ("epsilon", "epsilon"),
                ("threshold1", "V1.slopeThreshold"),
                ("threshold2", "V2.slopeThreshold"),
            ])
            .streams([
                ("indexes1", "V1.maxIndexes"),
                ("source1", "PriceKama"),
                ("indexes2", "V2.maxIndexes"),
                ("source2", "RsiKama"),
                ("time", "Time"),
                ("divergences", "bearishDivergences"),
                ("lines1", "V1.maxLineSegs"),
                ("lines2", "V2.maxLineSegs"),
            ]),
        OperatorConfig::new(OperatorKind::Divergence)
            .params([
                ("epsilon", "epsilon"),
                ("threshold1", "V1.slopeThreshold"),
                ("threshold2", "V2.slopeThreshold"),
            ])
            .streams([
                ("indexes1", "V1.minIndexes"),
                ("source1", "PriceKama"),
                ("indexes2", "V2.minIndexes"),
                ("source2", "RsiKama"),
                ("time", "Time"),
                ("divergences", "bullishDivergences"),
                ("lines1", "V1.minLineSegs"),
                ("lines2", "V2.minLineSegs"),
            ]),
    ];
    for (indexes, source, target) in [
        ("V1.discardedMaxIndexes", "PriceKama", "V1.discardedMaxs"),
        ("V1.discardedMinIndexes", "PriceKama", "V1.discardedMins"),
        ("V2.discardedMaxIndexes", "RsiKama", "V2.discardedMaxs"),
        ("V2.discardedMinIndexes", "RsiKama", "V2.discardedMins"),
    ] {
        operator_configs.push(OperatorConfig::new(OperatorKind::Pick).streams([
            ("indexes", indexes),
            ("source", source),
            ("target", target),
        ]));
    }
    for (lines, source, target) in [
        ("V1.maxLineSegs", "PriceKama", "V1.maxLines"),
        ("V1.minLineSegs", "PriceKama", "V1.minLines"),
        ("V2.maxLineSegs", "RsiKama", "V2.maxLines"),
        ("V2.minLineSegs", "RsiKama", "V2.minLines"),
    ] {
        operator_configs.push(OperatorConfig::new(OperatorKind::Line).streams([
            ("lines", lines),
            ("source", source),
            ("target", target),
        ]));
    }
    operator_configs.push(
        OperatorConfig::new(OperatorKind::Trader)
            .params([("classCode", "classCode"), ("secCode", "secCode")])
            .streams([
                ("price", "Price"),
                ("time", "Time"),
                ("divergences", "bearishDivergences"),
            ]),
    );

    ProcessorConfig::new(
        "trading",
        vec![
            GraphConfig::new("Price"),
            GraphConfig::new("PriceKama"),
            GraphConfig::new("Rsi"),
            GraphConfig::new("RsiKama"),
            GraphConfig::new("V1.discardedMaxs").rendered_as(GraphType::PeakUp),
            GraphConfig::new("V1.discardedMins").rendered_as(GraphType::PeakDown),
            GraphConfig::new("V2.discardedMaxs").rendered_as(GraphType::PeakUp),
            GraphConfig::new("V2.discardedMins").rendered_as(GraphType::PeakDown),
            GraphConfig::new("V1.maxLines").rendered_as(GraphType::Bars),
            GraphConfig::new("V1.minLines").rendered_as(GraphType::Bars),
            GraphConfig::new("V2.maxLines").rendered_as(GraphType::Bars),
            GraphConfig::new("V2.minLines").rendered_as(GraphType::Bars),
        ],
        operator_configs,
    )
    .with_default_params(params_from([
        (
            PARAM_GRAPHS,
            json!("PriceKama, V1.discardedMaxs, V1.discardedMins, V1.maxLines, V1.minLines"),
        ),
        ("PriceKama.kerLag", json!(10)),
        ("PriceKama.fastLag", json!(2)),
        ("PriceKama.slowLag", json!(30)),
        ("Rsi.lag", json!(14)),
        ("RsiKama.kerLag", json!(10)),
        ("RsiKama.fastLag", json!(2)),
        ("RsiKama.slowLag", json!(30)),
    ]))
    .with_constant_params(params_from([
        ("V1.peakWidth", json!(3)),
        ("V1.peakThreshold", json!(0.0)),
        ("V1.peakMinMaxLag", json!(10)),
        ("V2.peakWidth", json!(3)),
        ("V2.peakThreshold", json!(0.0)),
        ("V2.peakMinMaxLag", json!(10)),
        ("epsilon", json!(2)),
        ("V1.slopeThreshold", json!(0.0)),
        ("V2.slopeThreshold", json!(0.0)),
    ]))
}
