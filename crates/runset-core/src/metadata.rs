//! Survey / station / run metadata and the per-survey aggregate built while
//! materializing a dataset.
//!
//! The aggregate is what downstream processing reads to populate its
//! configuration: one survey, the stations that contributed rows, and under
//! each station the runs that were used.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::table::error::{DatasetError, MultipleSurveysSnafu};

/// Metadata describing one acquisition run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run id.
    pub id: String,
    /// Samples per second.
    pub sample_rate: f64,
    /// First sample time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Last sample time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Channel names recorded during the run.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl RunMetadata {
    /// Minimal run metadata with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Metadata describing one station and the runs recorded under it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    /// Station id.
    pub id: String,
    /// Runs keyed by run id.
    #[serde(default)]
    pub runs: BTreeMap<String, RunMetadata>,
}

impl StationMetadata {
    /// Station metadata with no runs.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            runs: BTreeMap::new(),
        }
    }

    /// Add (or replace) a run under this station.
    ///
    /// Overlap fragments of one run share the run id, so adding the same run
    /// twice keeps a single entry.
    pub fn add_run(&mut self, run: RunMetadata) {
        self.runs.insert(run.id.clone(), run);
    }

    /// Run ids in sorted order.
    pub fn run_ids(&self) -> Vec<&str> {
        self.runs.keys().map(String::as_str).collect()
    }
}

/// Metadata describing one survey and the stations that belong to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyMetadata {
    /// Survey id.
    pub id: String,
    /// Stations keyed by station id.
    #[serde(default)]
    pub stations: BTreeMap<String, StationMetadata>,
}

impl SurveyMetadata {
    /// Survey metadata with no stations.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stations: BTreeMap::new(),
        }
    }

    /// Add (or replace) a station.
    pub fn add_station(&mut self, station: StationMetadata) {
        self.stations.insert(station.id.clone(), station);
    }

    /// Borrow a station by id.
    pub fn station(&self, id: &str) -> Option<&StationMetadata> {
        self.stations.get(id)
    }
}

/// The survey, station, and run a single archived run belongs to.
///
/// Archives hand this back for a run reference; the aggregate folds it in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunLineage {
    /// Survey-level metadata (its `stations` map is ignored by the fold).
    pub survey: SurveyMetadata,
    /// Station-level metadata (its `runs` map is ignored by the fold).
    pub station: StationMetadata,
    /// Run-level metadata.
    pub run: RunMetadata,
}

/// What a single [`SurveyAggregate::fold`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    /// First row of the survey: the survey entry was created.
    SurveyEstablished,
    /// The station was new to the survey and was added with its run.
    StationAdded,
    /// The station already existed; the run was added under it.
    RunAdded,
}

/// Accumulating survey metadata keyed by survey id.
///
/// At most one survey id is supported; folding a run from a second survey is
/// a fatal error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurveyAggregate {
    surveys: BTreeMap<String, SurveyMetadata>,
}

impl SurveyAggregate {
    /// Empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one run's lineage into the aggregate.
    ///
    /// The transition is chosen by map lookups, so the result does not depend
    /// on the order rows are visited in.
    pub fn fold(&mut self, lineage: &RunLineage) -> Result<FoldOutcome, DatasetError> {
        let survey_id = lineage.survey.id.as_str();
        let station_id = lineage.station.id.as_str();

        let outcome = match self.surveys.get_mut(survey_id) {
            Some(survey) => match survey.stations.get_mut(station_id) {
                Some(station) => {
                    station.add_run(lineage.run.clone());
                    FoldOutcome::RunAdded
                }
                None => {
                    survey.add_station(station_with_run(lineage));
                    FoldOutcome::StationAdded
                }
            },
            None => {
                if let Some(existing) = self.surveys.keys().next() {
                    return MultipleSurveysSnafu {
                        existing: existing.clone(),
                        found: survey_id.to_string(),
                    }
                    .fail();
                }
                let mut survey = SurveyMetadata::new(survey_id);
                survey.add_station(station_with_run(lineage));
                self.surveys.insert(survey_id.to_string(), survey);
                FoldOutcome::SurveyEstablished
            }
        };

        debug!(
            "survey {survey_id}: {outcome:?} for station {station_id} run {}",
            lineage.run.id
        );
        Ok(outcome)
    }

    /// Borrow a survey by id.
    pub fn get(&self, survey_id: &str) -> Option<&SurveyMetadata> {
        self.surveys.get(survey_id)
    }

    /// Every aggregated survey, keyed by id.
    pub fn surveys(&self) -> &BTreeMap<String, SurveyMetadata> {
        &self.surveys
    }

    /// Survey ids present (zero or one).
    pub fn survey_ids(&self) -> Vec<&str> {
        self.surveys.keys().map(String::as_str).collect()
    }

    /// Returns `true` if nothing has been folded yet.
    pub fn is_empty(&self) -> bool {
        self.surveys.is_empty()
    }

    /// Consume the aggregate and return the map.
    pub fn into_inner(self) -> BTreeMap<String, SurveyMetadata> {
        self.surveys
    }
}

fn station_with_run(lineage: &RunLineage) -> StationMetadata {
    let mut station = StationMetadata {
        id: lineage.station.id.clone(),
        runs: BTreeMap::new(),
    };
    station.add_run(lineage.run.clone());
    station
}
