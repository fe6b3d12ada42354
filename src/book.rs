//! Order-book engine: incremental snapshot/delta application and the
//! top-of-book CRC32 checksum.
//!
//! Books are kept as sorted vectors (bids descending, asks ascending),
//! which beats tree maps at the depths the feed serves (<= 1000 levels).
//! After every application no level carries zero quantity.

use std::collections::HashMap;

use crate::types::{BookLevel, OrderBook};
use crate::wire::BookPayload;

/// How many levels per side feed the checksum.
pub const CHECKSUM_DEPTH: usize = 10;

/// Maintains one [`OrderBook`] per subscribed symbol.
#[derive(Debug, Default)]
pub struct BookEngine {
    books: HashMap<String, OrderBook>,
}

impl BookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<OrderBook> {
        self.books.remove(symbol)
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Replace both sides with the snapshot payload.
    pub fn apply_snapshot(&mut self, payload: &BookPayload) -> &OrderBook {
        let book = self
            .books
            .entry(payload.symbol.clone())
            .or_insert_with(|| OrderBook {
                symbol: payload.symbol.clone(),
                ..Default::default()
            });

        book.bids = payload
            .bids
            .iter()
            .copied()
            .filter(|level| level.qty > 0.0)
            .collect();
        book.asks = payload
            .asks
            .iter()
            .copied()
            .filter(|level| level.qty > 0.0)
            .collect();
        sort_side(&mut book.bids, true);
        sort_side(&mut book.asks, false);
        book.checksum = payload.checksum.unwrap_or(0);
        book
    }

    /// Apply a delta: qty > 0 inserts or updates the level, qty = 0 removes
    /// it. An update for an unknown symbol starts an empty book; the
    /// checksum validation downstream forces a snapshot resync if that book
    /// is actually diverged.
    pub fn apply_update(&mut self, payload: &BookPayload) -> &OrderBook {
        let book = self
            .books
            .entry(payload.symbol.clone())
            .or_insert_with(|| OrderBook {
                symbol: payload.symbol.clone(),
                ..Default::default()
            });

        for level in &payload.bids {
            apply_level(&mut book.bids, *level, true);
        }
        for level in &payload.asks {
            apply_level(&mut book.asks, *level, false);
        }
        book.checksum = payload.checksum.unwrap_or(book.checksum);
        book
    }

    /// CRC32 over the canonical digit strings of the top levels: the top
    /// ten asks (ascending) then the top ten bids (descending), price then
    /// qty per level, decimal points removed and leading zeros stripped.
    pub fn compute_checksum(book: &OrderBook) -> u32 {
        let mut digits = String::with_capacity(CHECKSUM_DEPTH * 2 * 16);
        for level in book.asks.iter().take(CHECKSUM_DEPTH) {
            push_digits(&mut digits, level.price);
            push_digits(&mut digits, level.qty);
        }
        for level in book.bids.iter().take(CHECKSUM_DEPTH) {
            push_digits(&mut digits, level.price);
            push_digits(&mut digits, level.qty);
        }
        crc32fast::hash(digits.as_bytes())
    }
}

fn sort_side(levels: &mut [BookLevel], descending: bool) {
    if descending {
        levels.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        levels.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    }
}

fn apply_level(levels: &mut Vec<BookLevel>, update: BookLevel, descending: bool) {
    let position = levels.iter().position(|l| l.price == update.price);
    match (position, update.qty > 0.0) {
        (Some(i), true) => levels[i].qty = update.qty,
        (Some(i), false) => {
            levels.remove(i);
        }
        (None, true) => {
            let insert_at = levels
                .iter()
                .position(|l| {
                    if descending {
                        l.price < update.price
                    } else {
                        l.price > update.price
                    }
                })
                .unwrap_or(levels.len());
            levels.insert(insert_at, update);
        }
        (None, false) => {}
    }
}

/// Append the canonical digit string for one value: up to eight fractional
/// digits, trailing zeros trimmed, decimal point removed, leading zeros
/// stripped. `50000.1` -> `500001`, `0.00021` -> `21`.
fn push_digits(out: &mut String, value: f64) {
    let formatted = format!("{value:.8}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    let start = out.len();
    for c in trimmed.chars() {
        if c != '.' {
            out.push(c);
        }
    }
    // Strip leading zeros within this fragment.
    let nonzero = out[start..].find(|c| c != '0');
    match nonzero {
        Some(offset) if offset > 0 => {
            out.drain(start..start + offset);
        }
        None => {
            out.truncate(start);
            out.push('0');
        }
        _ => {}
    }
}
