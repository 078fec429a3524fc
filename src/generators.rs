//! Value producers for mock definitions.

use crate::factory::{ArraySize, Generator};
use fake::faker::lorem::en::Words;
use fake::faker::name::en::Name;
use fake::Fake;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Strictly increasing integers starting at `start`.
///
/// The sequence lives as long as the generator, so records added to a store
/// later keep counting from where generation left off.
pub fn auto_increment(start: i64) -> Generator {
    let next = Arc::new(AtomicI64::new(start));
    Generator::from_fn(move || Value::from(next.fetch_add(1, Ordering::SeqCst)))
}

/// Uniform integer in `[min, max]`.
pub fn int(min: i64, max: i64) -> Generator {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    Generator::from_fn(move || Value::from(rand::thread_rng().gen_range(low..=high)))
}

/// `true` with probability `chance_true`. NaN counts as never.
pub fn boolean(chance_true: f64) -> Generator {
    let p = if chance_true.is_nan() {
        0.0
    } else {
        chance_true.clamp(0.0, 1.0)
    };
    Generator::from_fn(move || Value::Bool(rand::thread_rng().gen_bool(p)))
}

/// One of the given literals, picked uniformly. An empty list yields null.
pub fn one_of<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Generator {
    let items: Vec<Value> = items.into_iter().map(Into::into).collect();
    Generator::from_fn(move || {
        items
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or(Value::Null)
    })
}

/// Always the same value.
pub fn constant(value: impl Into<Value>) -> Generator {
    let value = value.into();
    Generator::from_fn(move || value.clone())
}

/// `word_count` lorem ipsum words joined by spaces.
pub fn lorem(word_count: usize) -> Generator {
    Generator::from_fn(move || {
        let words: Vec<String> = Words(word_count..word_count + 1).fake();
        Value::String(words.join(" "))
    })
}

/// A full name.
pub fn name() -> Generator {
    Generator::from_fn(|| Value::String(Name().fake()))
}

/// Array of `element`, sized by `size`.
pub fn array(element: impl Into<Generator>, size: ArraySize) -> Generator {
    Generator::Array {
        element: Box::new(element.into()),
        size,
    }
}
