// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The immutable description of one test run.
//!
//! A [`RunSpec`] is constructed once per invocation and never mutated;
//! every variant configuration (a retry batch, a worker's partition) is a
//! copy with explicit overrides. A [`WorkerRunSpec`] is a `RunSpec` bound
//! to a [`ResultChannel`], serialized across the process boundary inside
//! the versioned envelope.

use crate::{
    channel::ResultChannel,
    errors::{InvalidOverrideError, WorkerSpecDecodeError},
    test_filter::{FilterPatterns, TestFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use itertools::Either;
use regatta_metadata::{Decoded, TestId, wire};
use serde::{Deserialize, Serialize, de, de::Deserializer, ser::Serializer};
use std::{fmt, ops::Deref, str::FromStr, time::Duration};

/// Reference-leak hunting configuration.
///
/// `filename` is an append-only artifact owned by whichever worker session
/// writes it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HuntRefleak {
    /// Warmup iterations whose allocation deltas are discarded.
    pub warmups: u32,

    /// Measured iterations.
    pub runs: u32,

    /// Where captured allocation deltas are appended.
    pub filename: Utf8PathBuf,
}

/// The seed for randomized scheduling order.
///
/// Serialized as either an integer or the string `"random"`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RandomSeed {
    /// Resolve a fresh seed once per run.
    Random,

    /// Use this exact seed.
    Fixed(u64),
}

impl Serialize for RandomSeed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Random => serializer.serialize_str("random"),
            Self::Fixed(seed) => serializer.serialize_u64(*seed),
        }
    }
}

impl<'de> Deserialize<'de> for RandomSeed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;

        impl de::Visitor<'_> for V {
            type Value = RandomSeed;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an integer seed or the string \"random\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                RandomSeed::from_str(v).map_err(de::Error::custom)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RandomSeed::Fixed(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(RandomSeed::Fixed)
                    .map_err(|_| de::Error::custom("seed may not be negative"))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl FromStr for RandomSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "random" {
            return Ok(Self::Random);
        }
        s.parse::<u64>()
            .map(Self::Fixed)
            .map_err(|err| format!("invalid random seed `{s}`: {err}"))
    }
}

impl fmt::Display for RandomSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Fixed(seed) => write!(f, "{seed}"),
        }
    }
}

/// The number of scheduling units required to cover a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobCount {
    /// A bounded run covering each test once.
    Finite(usize),

    /// A forever run: work is issued until something stops it.
    Unbounded,
}

impl JobCount {
    /// Returns true for an unbounded run.
    pub fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl fmt::Display for JobCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// All valid field names for the dynamic override path.
pub(crate) static KNOWN_FIELDS: &[&str] = &[
    "tests",
    "fail_fast",
    "fail_env_changed",
    "match_tests",
    "match_tests_dict",
    "rerun",
    "forever",
    "pgo",
    "pgo_extended",
    "output_on_failure",
    "timeout",
    "verbose",
    "quiet",
    "hunt_refleak",
    "test_dir",
    "use_junit",
    "memory_limit",
    "gc_threshold",
    "use_resources",
    "worker_command",
    "randomize",
    "random_seed",
];

/// Immutable description of one test run.
///
/// Construct with [`RunSpec::new`], then derive variants with
/// [`RunSpec::copy`]. Field meanings are documented on the accessors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    tests: Vec<TestId>,
    fail_fast: bool,
    fail_env_changed: bool,
    match_tests: TestFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_tests_dict: Option<IndexMap<TestId, FilterPatterns>>,
    rerun: bool,
    forever: bool,
    pgo: bool,
    pgo_extended: bool,
    output_on_failure: bool,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    timeout: Option<Duration>,
    verbose: u8,
    quiet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hunt_refleak: Option<HuntRefleak>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_dir: Option<Utf8PathBuf>,
    use_junit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gc_threshold: Option<u32>,
    use_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worker_command: Option<Vec<String>>,
    randomize: bool,
    random_seed: RandomSeed,
}

/// A partial set of `RunSpec` fields for copy-with-override.
///
/// `None` keeps the receiver's value. Fields that are optional on the spec
/// are doubly wrapped so an override can also clear them.
#[derive(Clone, Debug, Default)]
pub struct RunSpecOverrides {
    /// Replacement test list.
    pub tests: Option<Vec<TestId>>,
    /// Replacement fail-fast flag.
    pub fail_fast: Option<bool>,
    /// Replacement fail-env-changed flag.
    pub fail_env_changed: Option<bool>,
    /// Replacement name filter.
    pub match_tests: Option<TestFilter>,
    /// Replacement per-test sub-filters.
    pub match_tests_dict: Option<Option<IndexMap<TestId, FilterPatterns>>>,
    /// Replacement rerun flag.
    pub rerun: Option<bool>,
    /// Replacement forever flag.
    pub forever: Option<bool>,
    /// Replacement pgo flag.
    pub pgo: Option<bool>,
    /// Replacement extended-pgo flag.
    pub pgo_extended: Option<bool>,
    /// Replacement output-on-failure flag.
    pub output_on_failure: Option<bool>,
    /// Replacement session timeout.
    pub timeout: Option<Option<Duration>>,
    /// Replacement verbosity level.
    pub verbose: Option<u8>,
    /// Replacement quiet flag.
    pub quiet: Option<bool>,
    /// Replacement leak-hunt configuration.
    pub hunt_refleak: Option<Option<HuntRefleak>>,
    /// Replacement test directory.
    pub test_dir: Option<Option<Utf8PathBuf>>,
    /// Replacement JUnit flag.
    pub use_junit: Option<bool>,
    /// Replacement memory limit.
    pub memory_limit: Option<Option<String>>,
    /// Replacement GC threshold.
    pub gc_threshold: Option<Option<u32>>,
    /// Replacement resource allow-list.
    pub use_resources: Option<Vec<String>>,
    /// Replacement worker launch command.
    pub worker_command: Option<Option<Vec<String>>>,
    /// Replacement randomize flag.
    pub randomize: Option<bool>,
    /// Replacement random seed.
    pub random_seed: Option<RandomSeed>,
}

impl RunSpec {
    /// Creates a spec for the given tests with every knob at its default:
    /// no filters, no timeout, no retries, sequential deterministic order.
    pub fn new(tests: Vec<TestId>) -> Self {
        Self {
            tests,
            fail_fast: false,
            fail_env_changed: false,
            match_tests: TestFilter::empty(),
            match_tests_dict: None,
            rerun: false,
            forever: false,
            pgo: false,
            pgo_extended: false,
            output_on_failure: false,
            timeout: None,
            verbose: 0,
            quiet: false,
            hunt_refleak: None,
            test_dir: None,
            use_junit: false,
            memory_limit: None,
            gc_threshold: None,
            use_resources: Vec::new(),
            worker_command: None,
            randomize: false,
            random_seed: RandomSeed::Random,
        }
    }

    /// Returns a new spec identical to the receiver except for the fields
    /// explicitly overridden.
    pub fn copy(&self, overrides: RunSpecOverrides) -> Self {
        let mut spec = self.clone();
        let RunSpecOverrides {
            tests,
            fail_fast,
            fail_env_changed,
            match_tests,
            match_tests_dict,
            rerun,
            forever,
            pgo,
            pgo_extended,
            output_on_failure,
            timeout,
            verbose,
            quiet,
            hunt_refleak,
            test_dir,
            use_junit,
            memory_limit,
            gc_threshold,
            use_resources,
            worker_command,
            randomize,
            random_seed,
        } = overrides;

        if let Some(v) = tests {
            spec.tests = v;
        }
        if let Some(v) = fail_fast {
            spec.fail_fast = v;
        }
        if let Some(v) = fail_env_changed {
            spec.fail_env_changed = v;
        }
        if let Some(v) = match_tests {
            spec.match_tests = v;
        }
        if let Some(v) = match_tests_dict {
            spec.match_tests_dict = v;
        }
        if let Some(v) = rerun {
            spec.rerun = v;
        }
        if let Some(v) = forever {
            spec.forever = v;
        }
        if let Some(v) = pgo {
            spec.pgo = v;
        }
        if let Some(v) = pgo_extended {
            spec.pgo_extended = v;
        }
        if let Some(v) = output_on_failure {
            spec.output_on_failure = v;
        }
        if let Some(v) = timeout {
            spec.timeout = v;
        }
        if let Some(v) = verbose {
            spec.verbose = v;
        }
        if let Some(v) = quiet {
            spec.quiet = v;
        }
        if let Some(v) = hunt_refleak {
            spec.hunt_refleak = v;
        }
        if let Some(v) = test_dir {
            spec.test_dir = v;
        }
        if let Some(v) = use_junit {
            spec.use_junit = v;
        }
        if let Some(v) = memory_limit {
            spec.memory_limit = v;
        }
        if let Some(v) = gc_threshold {
            spec.gc_threshold = v;
        }
        if let Some(v) = use_resources {
            spec.use_resources = v;
        }
        if let Some(v) = worker_command {
            spec.worker_command = v;
        }
        if let Some(v) = randomize {
            spec.randomize = v;
        }
        if let Some(v) = random_seed {
            spec.random_seed = v;
        }
        spec
    }

    /// Copy-with-override for callers holding dynamic JSON.
    ///
    /// Every key must name a real field and its value must decode as the
    /// field's type; anything else fails with [`InvalidOverrideError`].
    pub fn copy_from_map(
        &self,
        overrides: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, InvalidOverrideError> {
        for field in overrides.keys() {
            if !KNOWN_FIELDS.contains(&field.as_str()) {
                return Err(InvalidOverrideError::UnknownField {
                    field: field.clone(),
                    known: KNOWN_FIELDS.to_vec(),
                });
            }
        }

        let state = serde_json::to_value(self).expect("RunSpec always serializes");
        let serde_json::Value::Object(mut state) = state else {
            unreachable!("RunSpec serializes to an object");
        };

        let mut current = self.clone();
        for (field, value) in overrides {
            state.insert(field.clone(), value.clone());
            current = serde_json::from_value(serde_json::Value::Object(state.clone())).map_err(
                |source| InvalidOverrideError::InvalidValue {
                    field: field.clone(),
                    source,
                },
            )?;
        }
        Ok(current)
    }

    /// Returns a [`WorkerRunSpec`] combining the receiver's fields (with
    /// `overrides` applied) and a bound result channel.
    pub fn derive_worker_spec(
        &self,
        overrides: RunSpecOverrides,
        result_channel: ResultChannel,
    ) -> WorkerRunSpec {
        WorkerRunSpec {
            spec: self.copy(overrides),
            result_channel,
        }
    }

    /// Looks up the sub-filter registered for a specific test name.
    ///
    /// Exact-name lookup only; `None` means no restriction.
    pub fn resolve_test_filter(&self, test: &TestId) -> Option<&FilterPatterns> {
        self.match_tests_dict.as_ref()?.get(test)
    }

    /// The number of scheduling units needed to cover all tests once, or
    /// [`JobCount::Unbounded`] for a forever run.
    pub fn job_count(&self) -> JobCount {
        if self.forever {
            JobCount::Unbounded
        } else {
            JobCount::Finite(self.tests.len())
        }
    }

    /// Lazily yields test identifiers in order: each test exactly once, or
    /// cycling the list indefinitely for a forever run.
    pub fn iter_tests(&self) -> impl Iterator<Item = &TestId> + '_ {
        if self.forever {
            Either::Left(self.tests.iter().cycle())
        } else {
            Either::Right(self.tests.iter())
        }
    }

    /// Returns true when worker results must travel over the inherited
    /// output stream rather than a descriptor or handle: an external worker
    /// command is in use, or this platform cannot pass descriptors/handles
    /// to children.
    pub fn prefers_inherited_output_channel(&self) -> bool {
        self.worker_command.is_some()
            || cfg!(any(target_os = "emscripten", target_os = "wasi"))
    }

    /// The ordered test list.
    pub fn tests(&self) -> &[TestId] {
        &self.tests
    }

    /// Stop scheduling after the first unrecovered failure.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Treat environment-changed outcomes as run failures.
    pub fn fail_env_changed(&self) -> bool {
        self.fail_env_changed
    }

    /// The test-name filter.
    pub fn match_tests(&self) -> &TestFilter {
        &self.match_tests
    }

    /// Retry failing tests once in isolation.
    pub fn rerun(&self) -> bool {
        self.rerun
    }

    /// Cycle the test list until something stops the run.
    pub fn forever(&self) -> bool {
        self.forever
    }

    /// Profile-guided-optimization data collection run.
    pub fn pgo(&self) -> bool {
        self.pgo
    }

    /// Extended PGO task set.
    pub fn pgo_extended(&self) -> bool {
        self.pgo_extended
    }

    /// Show captured output for failing tests.
    pub fn output_on_failure(&self) -> bool {
        self.output_on_failure
    }

    /// Per-session deadline.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Verbosity level.
    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    /// Suppress non-essential output.
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Leak-hunting configuration, if enabled.
    pub fn hunt_refleak(&self) -> Option<&HuntRefleak> {
        self.hunt_refleak.as_ref()
    }

    /// Alternate directory to run tests from.
    pub fn test_dir(&self) -> Option<&Utf8Path> {
        self.test_dir.as_deref()
    }

    /// Emit a JUnit XML report.
    pub fn use_junit(&self) -> bool {
        self.use_junit
    }

    /// Worker memory limit, passed through to the execution adapter.
    pub fn memory_limit(&self) -> Option<&str> {
        self.memory_limit.as_deref()
    }

    /// GC threshold override, passed through to the execution adapter.
    pub fn gc_threshold(&self) -> Option<u32> {
        self.gc_threshold
    }

    /// Resource allow-list, passed through to the execution adapter.
    pub fn use_resources(&self) -> &[String] {
        &self.use_resources
    }

    /// Override command used to launch workers.
    pub fn worker_command(&self) -> Option<&[String]> {
        self.worker_command.as_deref()
    }

    /// Shuffle the scheduling order.
    pub fn randomize(&self) -> bool {
        self.randomize
    }

    /// Seed for the shuffled order.
    pub fn random_seed(&self) -> RandomSeed {
        self.random_seed
    }
}

/// A [`RunSpec`] bound to a result channel, owned by one worker session.
///
/// Dereferences to the underlying spec.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerRunSpec {
    #[serde(flatten)]
    spec: RunSpec,
    result_channel: ResultChannel,
}

impl WorkerRunSpec {
    /// The underlying run spec.
    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    /// The bound result channel.
    pub fn result_channel(&self) -> ResultChannel {
        self.result_channel
    }

    /// Serializes the spec into its single-line wire form.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        wire::encode(self)
    }

    /// Decodes the wire form produced by [`to_wire`](Self::to_wire).
    ///
    /// Input without the envelope marker is rejected: it is some other
    /// structure, not a worker spec.
    pub fn from_wire(input: &str) -> Result<Self, WorkerSpecDecodeError> {
        match wire::decode::<Self>(input)? {
            Decoded::Payload(spec) => Ok(spec),
            Decoded::Untagged(_) => Err(WorkerSpecDecodeError::MissingMarker),
        }
    }
}

impl Deref for WorkerRunSpec {
    type Target = RunSpec;

    fn deref(&self) -> &RunSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_spec() -> RunSpec {
        let base = RunSpec::new(vec!["test_os".into(), "test_io".into(), "test_sys".into()]);
        base.copy(RunSpecOverrides {
            fail_fast: Some(true),
            rerun: Some(true),
            timeout: Some(Some(Duration::from_secs(90))),
            hunt_refleak: Some(Some(HuntRefleak {
                warmups: 2,
                runs: 5,
                filename: "reflog.txt".into(),
            })),
            match_tests_dict: Some(Some(IndexMap::from([(
                TestId::from("test_io"),
                FilterPatterns::new(["test_read", "test_write"]),
            )]))),
            use_resources: Some(vec!["network".to_owned()]),
            random_seed: Some(RandomSeed::Fixed(12345)),
            ..Default::default()
        })
    }

    #[test]
    fn copy_with_no_overrides_is_identity() {
        let spec = sample_spec();
        assert_eq!(spec.copy(RunSpecOverrides::default()), spec);
    }

    #[test]
    fn copy_from_empty_map_is_identity() {
        let spec = sample_spec();
        let copied = spec
            .copy_from_map(&serde_json::Map::new())
            .expect("empty override map is valid");
        assert_eq!(copied, spec);
    }

    #[test]
    fn copy_overrides_named_fields_only() {
        let spec = sample_spec();
        let copied = spec.copy(RunSpecOverrides {
            quiet: Some(true),
            timeout: Some(None),
            ..Default::default()
        });
        assert!(copied.quiet());
        assert_eq!(copied.timeout(), None);
        assert_eq!(copied.tests(), spec.tests());
        assert_eq!(copied.hunt_refleak(), spec.hunt_refleak());
    }

    #[test]
    fn copy_from_map_rejects_unknown_field() {
        let spec = sample_spec();
        let mut overrides = serde_json::Map::new();
        overrides.insert("fail_quickly".to_owned(), serde_json::Value::Bool(true));

        let err = spec
            .copy_from_map(&overrides)
            .expect_err("unknown field is rejected");
        match err {
            InvalidOverrideError::UnknownField { field, known } => {
                assert_eq!(field, "fail_quickly");
                assert!(known.contains(&"fail_fast"));
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn copy_from_map_rejects_bad_value_for_real_field() {
        let spec = sample_spec();
        let mut overrides = serde_json::Map::new();
        overrides.insert(
            "verbose".to_owned(),
            serde_json::Value::String("very".to_owned()),
        );

        let err = spec
            .copy_from_map(&overrides)
            .expect_err("bad value is rejected");
        assert!(matches!(
            err,
            InvalidOverrideError::InvalidValue { field, .. } if field == "verbose"
        ));
    }

    #[test]
    fn copy_from_map_applies_overrides() {
        let spec = sample_spec();
        let mut overrides = serde_json::Map::new();
        overrides.insert("quiet".to_owned(), serde_json::Value::Bool(true));
        overrides.insert(
            "tests".to_owned(),
            serde_json::json!(["test_sys", "test_os"]),
        );

        let copied = spec.copy_from_map(&overrides).expect("overrides are valid");
        assert!(copied.quiet());
        assert_eq!(
            copied.tests(),
            &[TestId::from("test_sys"), TestId::from("test_os")]
        );
        assert_eq!(copied.timeout(), spec.timeout());
    }

    #[test]
    fn job_count_finite_and_unbounded() {
        let spec = RunSpec::new(
            ["t1", "t2", "t3", "t4", "t5"]
                .into_iter()
                .map(TestId::from)
                .collect(),
        );
        assert_eq!(spec.job_count(), JobCount::Finite(5));

        let forever = spec.copy(RunSpecOverrides {
            forever: Some(true),
            ..Default::default()
        });
        assert_eq!(forever.job_count(), JobCount::Unbounded);
        assert!(forever.job_count().is_unbounded());
    }

    #[test]
    fn iter_tests_yields_each_once_in_order() {
        let spec = sample_spec();
        let seen: Vec<_> = spec.iter_tests().map(TestId::as_str).collect();
        assert_eq!(seen, ["test_os", "test_io", "test_sys"]);

        // Restartable: a second iteration yields the same sequence.
        let again: Vec<_> = spec.iter_tests().map(TestId::as_str).collect();
        assert_eq!(seen, again);
    }

    #[test]
    fn iter_tests_cycles_forever() {
        let spec = sample_spec().copy(RunSpecOverrides {
            forever: Some(true),
            ..Default::default()
        });
        let seen: Vec<_> = spec.iter_tests().take(8).map(TestId::as_str).collect();
        assert_eq!(
            seen,
            [
                "test_os", "test_io", "test_sys", "test_os", "test_io", "test_sys", "test_os",
                "test_io",
            ]
        );
    }

    #[test]
    fn resolve_test_filter_is_exact_name_lookup() {
        let spec = sample_spec();
        let patterns = spec
            .resolve_test_filter(&"test_io".into())
            .expect("test_io has a sub-filter");
        assert_eq!(
            patterns.iter().collect::<Vec<_>>(),
            ["test_read", "test_write"]
        );
        assert!(spec.resolve_test_filter(&"test_os".into()).is_none());
        // No wildcard matching at this layer.
        assert!(spec.resolve_test_filter(&"test_i".into()).is_none());
    }

    #[test]
    fn external_worker_command_prefers_stdout_channel() {
        let spec = sample_spec();
        assert!(!spec.prefers_inherited_output_channel());

        let external = spec.copy(RunSpecOverrides {
            worker_command: Some(Some(vec!["python3".to_owned(), "-m".to_owned()])),
            ..Default::default()
        });
        assert!(external.prefers_inherited_output_channel());
    }

    #[test]
    fn worker_spec_round_trips_over_the_wire() {
        let spec = sample_spec();
        let worker_spec = spec.derive_worker_spec(
            RunSpecOverrides {
                tests: Some(vec!["test_io".into()]),
                ..Default::default()
            },
            ResultChannel::UnixFd(7),
        );

        let wire_form = worker_spec.to_wire().expect("worker spec serializes");
        let back = WorkerRunSpec::from_wire(&wire_form).expect("wire form decodes");

        assert_eq!(back, worker_spec);
        // Sub-records come back as their structured forms.
        assert_eq!(
            back.hunt_refleak(),
            Some(&HuntRefleak {
                warmups: 2,
                runs: 5,
                filename: "reflog.txt".into(),
            })
        );
        assert_eq!(back.result_channel(), ResultChannel::UnixFd(7));
        assert_eq!(back.tests(), &[TestId::from("test_io")]);
    }

    #[test]
    fn untagged_json_is_not_a_worker_spec() {
        let err = WorkerRunSpec::from_wire(r#"{"tests": ["test_os"]}"#)
            .expect_err("untagged structure is rejected");
        assert!(matches!(err, WorkerSpecDecodeError::MissingMarker));
    }

    #[test]
    fn random_seed_wire_forms() {
        let fixed = serde_json::to_value(RandomSeed::Fixed(42)).expect("seed serializes");
        assert_eq!(fixed, serde_json::json!(42));
        let random = serde_json::to_value(RandomSeed::Random).expect("seed serializes");
        assert_eq!(random, serde_json::json!("random"));

        let parsed: RandomSeed =
            serde_json::from_value(serde_json::json!("random")).expect("string form parses");
        assert_eq!(parsed, RandomSeed::Random);
        let parsed: RandomSeed =
            serde_json::from_value(serde_json::json!(42)).expect("integer form parses");
        assert_eq!(parsed, RandomSeed::Fixed(42));
    }
}
