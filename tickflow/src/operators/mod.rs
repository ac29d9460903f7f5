//! The operator algebra: a uniform `calc()` contract over named, typed
//! streams and a string-keyed parameter bag, plus the compound wiring
//! that assembles operators into graphs.

mod basic;
mod compound;
mod divergence;
mod index;
mod indicators;
mod lines;
mod peaks;

pub use basic::*;
pub use compound::*;
pub use divergence::*;
pub use index::*;
pub use indicators::*;
pub use lines::*;
pub use peaks::*;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::stream::Stream;
use crate::trading::TraderOperator;
use crate::types::{Divergence, Line, SlopeType};

/// A stateful computation bound at construction to named input/output
/// streams.  `calc()` advances all outputs to catch up with the current
/// length of the inputs, and is idempotent given equal inputs.
pub trait Operator {
    fn calc(&mut self) -> Result<()>;

    fn type_name(&self) -> String {
        tynm::type_name::<Self>()
    }
}

/// Element type of a named stream slot, used to validate wiring and to
/// allocate intermediates at compound construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Float,
    Time,
    Index,
    Bool,
    Slope,
    Line,
    Divergence,
}

/// A [Stream] handle of any supported element type.
pub enum AnyStream {
    Float(Stream<f64>),
    Time(Stream<NaiveDateTime>),
    Index(Stream<usize>),
    Bool(Stream<bool>),
    Slope(Stream<SlopeType>),
    Line(Stream<Line>),
    Divergence(Stream<Divergence>),
}

macro_rules! for_each_variant {
    ($self:expr, $stream:ident => $body:expr) => {
        match $self {
            AnyStream::Float($stream) => $body,
            AnyStream::Time($stream) => $body,
            AnyStream::Index($stream) => $body,
            AnyStream::Bool($stream) => $body,
            AnyStream::Slope($stream) => $body,
            AnyStream::Line($stream) => $body,
            AnyStream::Divergence($stream) => $body,
        }
    };
}

impl AnyStream {
    pub fn allocate(stream_type: StreamType) -> AnyStream {
        match stream_type {
            StreamType::Float => AnyStream::Float(Stream::new()),
            StreamType::Time => AnyStream::Time(Stream::new()),
            StreamType::Index => AnyStream::Index(Stream::new()),
            StreamType::Bool => AnyStream::Bool(Stream::new()),
            StreamType::Slope => AnyStream::Slope(Stream::new()),
            StreamType::Line => AnyStream::Line(Stream::new()),
            StreamType::Divergence => AnyStream::Divergence(Stream::new()),
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            AnyStream::Float(_) => StreamType::Float,
            AnyStream::Time(_) => StreamType::Time,
            AnyStream::Index(_) => StreamType::Index,
            AnyStream::Bool(_) => StreamType::Bool,
            AnyStream::Slope(_) => StreamType::Slope,
            AnyStream::Line(_) => StreamType::Line,
            AnyStream::Divergence(_) => StreamType::Divergence,
        }
    }

    /// A new handle onto the same backing, cursor at zero.
    pub fn handle(&self) -> AnyStream {
        match self {
            AnyStream::Float(s) => AnyStream::Float(s.handle()),
            AnyStream::Time(s) => AnyStream::Time(s.handle()),
            AnyStream::Index(s) => AnyStream::Index(s.handle()),
            AnyStream::Bool(s) => AnyStream::Bool(s.handle()),
            AnyStream::Slope(s) => AnyStream::Slope(s.handle()),
            AnyStream::Line(s) => AnyStream::Line(s.handle()),
            AnyStream::Divergence(s) => AnyStream::Divergence(s.handle()),
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pos(&self) -> usize {
        for_each_variant!(self, s => s.pos())
    }

    pub fn set_pos(&self, pos: usize) {
        for_each_variant!(self, s => s.set_pos(pos))
    }

    pub fn as_float(&self) -> Option<&Stream<f64>> {
        match self {
            AnyStream::Float(s) => Some(s),
            _ => None,
        }
    }

    /// Installs a retroactor that rewinds this handle's own cursor to the
    /// change index.  The Processor puts one on every stream it returns
    /// data from, so retroactive edits surface as negative row offsets.
    pub fn rewind_on_change(&self) {
        for_each_variant!(self, s => {
            let weak = s.weak();
            s.set_retroactor(move |change, index| {
                if change.is_after()
                    && let Some(stream) = weak.upgrade()
                {
                    stream.set_pos(index);
                }
            });
        })
    }
}

/// The named, typed stream namespace operators are wired against.
#[derive(Default)]
pub struct Streams {
    inner: BTreeMap<String, AnyStream>,
}

macro_rules! stream_accessors {
    ($get:ident, $or_new:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, name: &str) -> Result<Stream<$ty>> {
            match self.inner.get(name) {
                Some(AnyStream::$variant(stream)) => Ok(stream.handle()),
                Some(other) => Err(Error::config(format!(
                    "stream {name} has type {:?}, expected {:?}",
                    other.stream_type(),
                    StreamType::$variant
                ))),
                None => Err(Error::config(format!("missing stream ({name})"))),
            }
        }

        /// Like the plain accessor, but a missing name yields a fresh
        /// private stream (used for optional outputs).
        pub fn $or_new(&self, name: &str) -> Result<Stream<$ty>> {
            match self.inner.get(name) {
                None => Ok(Stream::new()),
                Some(_) => self.$get(name),
            }
        }
    };
}

impl Streams {
    stream_accessors!(float, float_or_new, Float, f64);
    stream_accessors!(time, time_or_new, Time, NaiveDateTime);
    stream_accessors!(index, index_or_new, Index, usize);
    stream_accessors!(boolean, boolean_or_new, Bool, bool);
    stream_accessors!(slope, slope_or_new, Slope, SlopeType);
    stream_accessors!(line, line_or_new, Line, Line);
    stream_accessors!(divergence, divergence_or_new, Divergence, Divergence);

    pub fn insert(&mut self, name: impl Into<String>, stream: AnyStream) {
        self.inner.insert(name.into(), stream);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&AnyStream> {
        self.inner.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnyStream)> {
        self.inner.iter()
    }

    /// A bag of fresh handles onto the same backings.
    pub fn handles(&self) -> Streams {
        Streams {
            inner: self
                .inner
                .iter()
                .map(|(name, stream)| (name.clone(), stream.handle()))
                .collect(),
        }
    }

    /// Allocates `name` with the given type if absent; errors if it exists
    /// with a different type.
    pub fn ensure(&mut self, name: &str, stream_type: StreamType) -> Result<()> {
        match self.inner.get(name) {
            None => {
                self.inner
                    .insert(name.to_string(), AnyStream::allocate(stream_type));
                Ok(())
            }
            Some(existing) if existing.stream_type() == stream_type => Ok(()),
            Some(existing) => Err(Error::config(format!(
                "stream {name} wired as both {:?} and {:?}",
                existing.stream_type(),
                stream_type
            ))),
        }
    }
}

/// Tag enum of every config-constructible operator.  Carries the stream
/// signature metadata the compound wiring validates names against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKind {
    Sma,
    Ema,
    Ker,
    Kama,
    Rsi,
    Macd,
    Channel,
    MinMax,
    FractalEx,
    ChannelBurst,
    Pick,
    Lookup,
    Coindex,
    Line,
    Slope,
    Divergence,
    HwSplit,
    VariadicLoPass,
    Diff,
    Multiplexer,
    Delta,
    DayBound,
    LoPass,
    DeltaLoPass,
    HiPass,
    Trader,
}

use self::StreamType as S;

impl OperatorKind {
    /// The operator's named stream slots and their element types.
    /// Slots wired dynamically (the multiplexer's source) are not listed
    /// and default to float.
    pub fn stream_types(&self) -> &'static [(&'static str, StreamType)] {
        match self {
            OperatorKind::Sma | OperatorKind::Ema | OperatorKind::Rsi | OperatorKind::Macd => {
                &[("source", S::Float), ("target", S::Float)]
            }
            OperatorKind::Ker => &[("source", S::Float), ("ker", S::Float)],
            OperatorKind::Kama => &[("source", S::Float), ("target", S::Float), ("ker", S::Float)],
            OperatorKind::Channel => &[
                ("source", S::Float),
                ("upper", S::Float),
                ("lower", S::Float),
                ("mid", S::Float),
            ],
            OperatorKind::MinMax => &[("source", S::Float), ("min", S::Float), ("max", S::Float)],
            OperatorKind::FractalEx => &[
                ("source", S::Float),
                ("minIndexes", S::Index),
                ("maxIndexes", S::Index),
                ("discardedMinIndexes", S::Index),
                ("discardedMaxIndexes", S::Index),
            ],
            OperatorKind::ChannelBurst => &[
                ("source", S::Float),
                ("minIndexes", S::Index),
                ("maxIndexes", S::Index),
                ("upper", S::Float),
                ("lower", S::Float),
                ("mid", S::Float),
            ],
            OperatorKind::Pick | OperatorKind::Lookup => {
                &[("indexes", S::Index), ("source", S::Float), ("target", S::Float)]
            }
            OperatorKind::Coindex => &[
                ("indexes1", S::Index),
                ("indexes2", S::Index),
                ("coindexes1", S::Index),
                ("coindexes2", S::Index),
            ],
            OperatorKind::Line => &[("lines", S::Line), ("source", S::Float), ("target", S::Float)],
            OperatorKind::Slope => &[
                ("indexes", S::Index),
                ("source", S::Float),
                ("time", S::Time),
                ("slopeTypes", S::Slope),
            ],
            OperatorKind::Divergence => &[
                ("indexes1", S::Index),
                ("source1", S::Float),
                ("indexes2", S::Index),
                ("source2", S::Float),
                ("time", S::Time),
                ("divergences", S::Divergence),
                ("lines1", S::Line),
                ("lines2", S::Line),
            ],
            OperatorKind::HwSplit => &[
                ("source", S::Float),
                ("positive", S::Float),
                ("negative", S::Float),
            ],
            OperatorKind::VariadicLoPass => {
                &[("alpha", S::Float), ("source", S::Float), ("target", S::Float)]
            }
            OperatorKind::Diff => &[("source1", S::Float), ("source2", S::Float), ("target", S::Float)],
            OperatorKind::Multiplexer => &[("target", S::Float)],
            OperatorKind::Delta
            | OperatorKind::LoPass
            | OperatorKind::DeltaLoPass
            | OperatorKind::HiPass => &[("source", S::Float), ("target", S::Float)],
            OperatorKind::DayBound => &[("source", S::Time), ("target", S::Bool)],
            OperatorKind::Trader => &[
                ("price", S::Float),
                ("time", S::Time),
                ("divergences", S::Divergence),
            ],
        }
    }

    pub(crate) fn stream_type_of(&self, name: &str) -> Option<StreamType> {
        self.stream_types()
            .iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, stream_type)| *stream_type)
    }

    pub fn operator_name(&self) -> String {
        format!("{self:?}Operator")
    }

    pub fn build(&self, params: &Params, streams: &Streams) -> Result<Box<dyn Operator>> {
        let operator: Box<dyn Operator> = match self {
            OperatorKind::Sma => Box::new(SmaOperator::build(params, streams)?),
            OperatorKind::Ema => Box::new(build_ema(params, streams)?),
            OperatorKind::Ker => Box::new(KerOperator::build(params, streams)?),
            OperatorKind::Kama => Box::new(KamaOperator::build(params, streams)?),
            OperatorKind::Rsi => Box::new(RsiOperator::build(params, streams)?),
            OperatorKind::Macd => Box::new(MacdOperator::build(params, streams)?),
            OperatorKind::Channel => Box::new(ChannelOperator::build(params, streams)?),
            OperatorKind::MinMax => Box::new(MinMaxOperator::build(params, streams)?),
            OperatorKind::FractalEx => Box::new(FractalExOperator::build(params, streams)?),
            OperatorKind::ChannelBurst => Box::new(ChannelBurstOperator::build(params, streams)?),
            OperatorKind::Pick => Box::new(PickOperator::build(params, streams)?),
            OperatorKind::Lookup => Box::new(LookupOperator::build(params, streams)?),
            OperatorKind::Coindex => Box::new(CoindexOperator::build(params, streams)?),
            OperatorKind::Line => Box::new(LineOperator::build(params, streams)?),
            OperatorKind::Slope => Box::new(SlopeOperator::build(params, streams)?),
            OperatorKind::Divergence => Box::new(DivergenceOperator::build(params, streams)?),
            OperatorKind::HwSplit => Box::new(HwSplitOperator::build(params, streams)?),
            OperatorKind::VariadicLoPass => {
                Box::new(VariadicLoPassOperator::build(params, streams)?)
            }
            OperatorKind::Diff => Box::new(DiffOperator::build(params, streams)?),
            OperatorKind::Multiplexer => Box::new(MultiplexerOperator::build(params, streams)?),
            OperatorKind::Delta => Box::new(build_delta(params, streams)?),
            OperatorKind::DayBound => Box::new(build_day_bound(params, streams)?),
            OperatorKind::LoPass => Box::new(build_lo_pass(params, streams)?),
            OperatorKind::DeltaLoPass => Box::new(build_delta_lo_pass(params, streams)?),
            OperatorKind::HiPass => Box::new(build_hi_pass(params, streams)?),
            OperatorKind::Trader => Box::new(TraderOperator::build(params, streams)?),
        };
        Ok(operator)
    }
}
