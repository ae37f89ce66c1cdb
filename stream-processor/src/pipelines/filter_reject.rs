//! `clean → validate`, with rejects sent to the dead-letter channel.

use tracing::debug;

use crate::pipelines::traits::{Emission, Outcome, Processed, Topology};
use crate::record::{Record, ValidationOutcome};
use crate::sink::Channel;
use crate::stages::{clean, validate};

const CHANNELS: &[Channel] = &[Channel::Accepted, Channel::DeadLetter];

#[derive(Debug, Clone)]
pub struct FilterRejectTopology {
    forbidden_words: Vec<String>,
    max_length: usize,
}

impl FilterRejectTopology {
    pub fn new(forbidden_words: Vec<String>, max_length: usize) -> Self {
        Self {
            forbidden_words,
            max_length,
        }
    }
}

impl Topology for FilterRejectTopology {
    fn name(&self) -> &'static str {
        "filter-reject"
    }

    fn channels(&self) -> &'static [Channel] {
        CHANNELS
    }

    /// Every record goes to exactly one of `accepted` (cleaned value) or
    /// `dead-letter` (the untouched raw record). Cleaning runs once.
    fn process(&self, record: Record) -> Processed {
        let cleaned = clean(&record.value);

        match validate(&cleaned, &self.forbidden_words, self.max_length) {
            ValidationOutcome::Valid(value) => Processed::new(
                Outcome::Accepted,
                vec![Emission::new(Channel::Accepted, record.key, value)],
            ),
            ValidationOutcome::Rejected(reason) => {
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    reason = %reason,
                    "Record rejected"
                );
                Processed::new(
                    Outcome::Rejected(reason),
                    vec![Emission::new(Channel::DeadLetter, record.key, record.value)],
                )
            }
        }
    }
}
