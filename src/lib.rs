// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Crash-safe telemetry spool for edge nodes
//
// Each node writes every sample to a segmented, checksummed on-disk spool
// before anything else happens to it:
// - Frames are deleted only after the controller acknowledges durable ingest
// - Capacity caps evict the oldest segments and always leave a loss record
// - Replay runs in capture order, rate limited, resumable and interleaved
//   with live traffic
// - The controller judges liveness by arrival time and freshness by sample
//   time, so draining an old backlog never makes a node look dead

pub mod ack;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod fsprobe;
pub mod live;
pub mod liveness;
pub mod loss;
pub mod node;
pub mod protocol;
pub mod rate_limit;
pub mod replay;
pub mod segment;
pub mod sink;
pub mod spool;
pub mod transport;

// Re-export main types
pub use ack::{AckOutcome, AckState, AckTracker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, load_config_with_env, TelemetryConfig};
pub use controller::{ContiguousWatermark, ControllerService, Ingestor};
pub use envelope::{Envelope, TimeQuality};
pub use error::{SpoolError, SpoolResult};
pub use fsprobe::{FixedProbe, FreeSpaceProbe, StatvfsProbe};
pub use liveness::LivenessTracker;
pub use loss::{LossEvent, LossReason};
pub use node::{NodeRuntime, Producer};
pub use protocol::{AckMessage, LivenessReport, NodeStatus, ReplayState};
pub use replay::{ReplayCursor, ReplayPublisher, ReplayReader};
pub use segment::SegmentId;
pub use sink::{IngestSink, SinkFactory, UpsertOutcome};
pub use spool::{AppendReceipt, Spool, SpoolOptions, SpoolShared, SpoolStatus};
pub use transport::{MemoryTransport, Transport, ZenohTransport};
