//! The order sink: a process-global order queue and the operator that
//! feeds it from a divergence stream.

use std::sync::Mutex;

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::operators::{Operator, Streams};
use crate::params::{Params, get_str};
use crate::stream::Stream;
use crate::types::{Divergence, DivergenceClass, DivergenceType};

/// A limit order as handed to the execution frontend, serialized as
/// `KEY=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub time: NaiveDateTime,
    pub class_code: String,
    pub sec_code: String,
    pub action: String,
    pub operation: char,
    pub price: f64,
    pub quantity: u32,
    pub order_type: char,
}

impl Order {
    pub fn to_kv(&self) -> String {
        format!(
            "TIME={}\nCLASSCODE={}\nSECCODE={}\nACTION={}\nOPERATION={}\nPRICE={}\nQUANTITY={}\nTYPE={}",
            self.time, self.class_code, self.sec_code, self.action, self.operation, self.price,
            self.quantity, self.order_type
        )
    }
}

struct OrderQueue {
    orders: Vec<Order>,
    drained: usize,
}

static ORDERS: Mutex<OrderQueue> = Mutex::new(OrderQueue {
    orders: Vec::new(),
    drained: 0,
});

/// Process-global order repository with a drain cursor.
pub struct OrderRepo;

impl OrderRepo {
    pub fn add(order: Order) {
        info!("adding order: {order:?}");
        ORDERS.lock().unwrap().orders.push(order);
    }

    /// Orders accumulated since the previous drain.
    pub fn take_new() -> Vec<Order> {
        let mut queue = ORDERS.lock().unwrap();
        let drained = queue.drained;
        queue.drained = queue.orders.len();
        queue.orders[drained..].to_vec()
    }
}

/// Turns bearish class-A divergences into limit buy orders tagged with the
/// configured instrument codes.
pub struct TraderOperator {
    class_code: String,
    sec_code: String,
    price: Stream<f64>,
    time: Stream<NaiveDateTime>,
    divergences: Stream<Divergence>,
}

impl TraderOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let divergences = streams.divergence("divergences")?;
        // a retracted event cannot unwind an already placed order; re-read
        // the corrected history and surface the rewrite in the log
        let weak = divergences.weak();
        divergences.set_retroactor(move |change, index| {
            if change.is_after()
                && let Some(divergences) = weak.upgrade()
            {
                warn!("divergence history rewritten at {index}, re-reading");
                divergences.set_pos(index);
            }
        });
        Ok(Self {
            class_code: get_str(params, "classCode")?,
            sec_code: get_str(params, "secCode")?,
            price: streams.float("price")?,
            time: streams.time("time")?,
            divergences,
        })
    }
}

impl Operator for TraderOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(divergence) = self.divergences.get_next() {
            let Some(divergence) = divergence else {
                continue;
            };
            let time = self.time.get(divergence.index1 as isize);
            info!(
                "divergence detected: type={} class={} time={time:?}",
                divergence.divergence_type, divergence.class
            );
            if divergence.divergence_type == DivergenceType::Divergence
                && divergence.class == DivergenceClass::A
            {
                let (Some(price), Some(time)) = (self.price.get(divergence.index1 as isize), time)
                else {
                    warn!("divergence at {} has no price sample, skipping", divergence.index1);
                    continue;
                };
                OrderRepo::add(Order {
                    time,
                    class_code: self.class_code.clone(),
                    sec_code: self.sec_code.clone(),
                    action: "NEW_ORDER".to_string(),
                    operation: 'B',
                    price,
                    quantity: 1,
                    order_type: 'L',
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::AnyStream;
    use crate::params::params_from;
    use crate::types::Divergence;
    use serde_json::json;

    fn minute(i: usize) -> Option<NaiveDateTime> {
        Some(
            format!("2024-03-01T10:{:02}:00", i)
                .parse::<NaiveDateTime>()
                .unwrap(),
        )
    }

    #[test]
    fn trader_places_order_on_bearish_class_a() {
        let mut streams = Streams::default();
        streams.insert("price", AnyStream::Float(Stream::new()));
        streams.insert("time", AnyStream::Time(Stream::new()));
        streams.insert("divergences", AnyStream::Divergence(Stream::new()));
        let price = streams.float("price").unwrap();
        let time = streams.time("time").unwrap();
        let divergences = streams.divergence("divergences").unwrap();
        price.extend((0..10).map(|i| Some(100.0 + i as f64)));
        time.extend((0..10).map(minute));

        let params = params_from([("classCode", json!("TQBR")), ("secCode", json!("SBER"))]);
        let mut op = TraderOperator::build(&params, &streams).unwrap();

        divergences.append(Some(Divergence::new(
            DivergenceType::Convergence,
            DivergenceClass::A,
            3,
            3,
        )));
        divergences.append(Some(Divergence::new(
            DivergenceType::Divergence,
            DivergenceClass::A,
            7,
            7,
        )));
        op.calc().unwrap();

        let orders = OrderRepo::take_new();
        let placed = orders
            .iter()
            .find(|order| order.sec_code == "SBER")
            .expect("order placed");
        assert_eq!(placed.operation, 'B');
        assert_eq!(placed.order_type, 'L');
        assert_eq!(placed.price, 107.0);
        assert_eq!(placed.class_code, "TQBR");
        // convergence does not trade
        assert_eq!(
            orders.iter().filter(|o| o.sec_code == "SBER").count(),
            1
        );
    }

    #[test]
    fn order_serializes_as_kv_block() {
        let order = Order {
            time: "2024-03-01T10:07:00".parse().unwrap(),
            class_code: "TQBR".into(),
            sec_code: "GAZP".into(),
            action: "NEW_ORDER".into(),
            operation: 'B',
            price: 107.0,
            quantity: 1,
            order_type: 'L',
        };
        let kv = order.to_kv();
        assert!(kv.contains("CLASSCODE=TQBR"));
        assert!(kv.contains("OPERATION=B"));
        assert!(kv.contains("PRICE=107"));
        assert!(kv.lines().count() == 8);
    }
}
