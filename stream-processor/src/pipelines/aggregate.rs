//! `parse → threshold → convert → keyBy(station) → update → format`.
//!
//! Every record that clears the threshold produces one aggregate result
//! carrying the running average for its station. Replays of a position the
//! store already absorbed do not touch the averages. The latest absorbed
//! position of a station and partition re-emits the current average, since
//! its result may have been lost when the partition halted.

use std::sync::Arc;

use tracing::debug;

use crate::pipelines::traits::{Emission, Outcome, Processed, Topology};
use crate::record::{AggregateState, Record, RejectReason};
use crate::sink::Channel;
use crate::stages::{self, convert_unit, format_result, ResultLabels};
use crate::store::{Applied, KeyedAggregateStore};

const CHANNELS: &[Channel] = &[Channel::AggregateResult, Channel::DeadLetter];

/// Settings for [`AggregateTopology`].
#[derive(Debug, Clone)]
pub struct AggregateSettings {
    /// Readings at or below this temperature (Celsius) are dropped
    pub threshold: f64,
    pub field_count: usize,
    pub delimiter: String,
    pub labels: ResultLabels,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            field_count: stages::MIN_FIELD_COUNT,
            delimiter: stages::DEFAULT_DELIMITER.to_string(),
            labels: ResultLabels::default(),
        }
    }
}

pub struct AggregateTopology {
    store: Arc<KeyedAggregateStore>,
    settings: AggregateSettings,
}

impl AggregateTopology {
    pub fn new(store: Arc<KeyedAggregateStore>, settings: AggregateSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<KeyedAggregateStore> {
        &self.store
    }
}

impl Topology for AggregateTopology {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn channels(&self) -> &'static [Channel] {
        CHANNELS
    }

    fn process(&self, record: Record) -> Processed {
        let event = match stages::parse_delimited_with(
            &record.value,
            &self.settings.delimiter,
            self.settings.field_count,
        ) {
            Ok(event) => event,
            Err(failure) => {
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %failure,
                    "Unparseable reading"
                );
                return Processed::new(
                    Outcome::Rejected(RejectReason::ParseFailure),
                    vec![Emission::new(Channel::DeadLetter, record.key, record.value)],
                );
            }
        };

        // NaN never gets here, so `<=` is the exact complement of the filter
        if event.temperature_c <= self.settings.threshold {
            return Processed::silent(Outcome::Dropped);
        }

        let fahrenheit = convert_unit(event.temperature_c);
        match self
            .store
            .apply(&event.station, record.position(), fahrenheit, event.humidity)
        {
            Applied::Updated(state) => {
                Processed::new(Outcome::Aggregated, vec![self.result(event.station, &state)])
            }
            Applied::Redelivered(state) => {
                Processed::new(Outcome::Replayed, vec![self.result(event.station, &state)])
            }
            Applied::Replayed(_) => Processed::silent(Outcome::Replayed),
        }
    }
}

impl AggregateTopology {
    fn result(&self, station: String, state: &AggregateState) -> Emission {
        let value = format_result(&station, state, &self.settings.labels);
        Emission::new(Channel::AggregateResult, station, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> AggregateTopology {
        AggregateTopology::new(
            Arc::new(KeyedAggregateStore::new()),
            AggregateSettings::default(),
        )
    }

    #[test]
    fn test_hot_reading_updates_average() {
        let topology = topology();
        let processed = topology.process(Record::new("", "StationA,35.0,60.0", 0, 0));

        assert_eq!(processed.outcome, Outcome::Aggregated);
        assert_eq!(
            processed.emissions,
            vec![Emission::new(
                Channel::AggregateResult,
                "StationA",
                "StationA : Température Moyenne = 95.00°F, Humidité Moyenne = 60.00%"
            )]
        );

        let state = topology.store().get("StationA").unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.sum_metric_a, 95.0);
        assert_eq!(state.sum_metric_b, 60.0);
    }

    #[test]
    fn test_running_average_over_several_readings() {
        let topology = topology();
        topology.process(Record::new("", "StationA,35.0,60.0", 0, 0));
        let processed = topology.process(Record::new("", "StationA,40.0,40.0", 0, 1));

        // (95 + 104) / 2 = 99.5, (60 + 40) / 2 = 50
        assert_eq!(
            processed.emissions[0].value,
            "StationA : Température Moyenne = 99.50°F, Humidité Moyenne = 50.00%"
        );
    }

    #[test]
    fn test_cool_reading_is_dropped() {
        let topology = topology();
        let processed = topology.process(Record::new("", "StationA,20.0,50.0", 0, 0));

        assert_eq!(processed.outcome, Outcome::Dropped);
        assert!(processed.emissions.is_empty());
        assert_eq!(topology.store().get("StationA"), None);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let processed = topology().process(Record::new("", "StationA,30.0,50.0", 0, 0));
        assert_eq!(processed.outcome, Outcome::Dropped);
    }

    #[test]
    fn test_parse_failure_goes_to_dead_letter() {
        let topology = topology();
        let processed = topology.process(Record::new("raw-key", "StationA;35;60", 0, 0));

        assert_eq!(
            processed.outcome,
            Outcome::Rejected(RejectReason::ParseFailure)
        );
        assert_eq!(
            processed.emissions,
            vec![Emission::new(Channel::DeadLetter, "raw-key", "StationA;35;60")]
        );
        assert!(topology.store().is_empty());
    }

    #[test]
    fn test_older_replayed_position_is_absorbed() {
        let topology = topology();
        topology.process(Record::new("", "StationA,35.0,60.0", 2, 6));
        topology.process(Record::new("", "StationA,40.0,40.0", 2, 7));
        let replay = topology.process(Record::new("", "StationA,35.0,60.0", 2, 6));

        assert_eq!(replay.outcome, Outcome::Replayed);
        assert!(replay.emissions.is_empty());
        assert_eq!(topology.store().get("StationA").unwrap().count, 2);
    }

    #[test]
    fn test_redelivered_latest_position_emits_current_average() {
        let topology = topology();
        let first = topology.process(Record::new("", "StationA,35.0,60.0", 2, 7));
        let again = topology.process(Record::new("", "StationA,35.0,60.0", 2, 7));

        assert_eq!(first.outcome, Outcome::Aggregated);
        assert_eq!(again.outcome, Outcome::Replayed);
        assert_eq!(again.emissions, first.emissions);
        assert_eq!(topology.store().get("StationA").unwrap().count, 1);
    }

    #[test]
    fn test_custom_delimiter_and_labels() {
        let settings = AggregateSettings {
            threshold: 0.0,
            field_count: 4,
            delimiter: "|".to_string(),
            labels: ResultLabels {
                metric_a_label: "Temp".to_string(),
                metric_a_unit: "F".to_string(),
                metric_b_label: "Hum".to_string(),
                metric_b_unit: "%".to_string(),
            },
        };
        let topology = AggregateTopology::new(Arc::new(KeyedAggregateStore::new()), settings);

        let short = topology.process(Record::new("", "S1|10|20", 0, 0));
        assert_eq!(short.outcome, Outcome::Rejected(RejectReason::ParseFailure));

        let ok = topology.process(Record::new("", "S1|10|20|extra", 0, 1));
        assert_eq!(ok.emissions[0].value, "S1 : Temp = 50.00F, Hum = 20.00%");
    }
}
