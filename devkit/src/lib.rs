/*!
# Fleet DevKit - test doubles and scenario harness

Helpers for exercising the fleet kernel without a broker or a disk:
- Recording and failing dispatchers that capture task assignments the way
  the MQTT dispatcher would publish them
- In-memory and failing persistence sinks
- A builder for metric reports and their JSON payloads
- A harness that drives an engine on a manual clock
*/

pub mod mqtt_stub;
pub mod report_builder;
pub mod sink_stub;
pub mod test_utils;

pub use mqtt_stub::{FailingDispatcher, MockMessage, RecordingDispatcher};
pub use report_builder::ReportBuilder;
pub use sink_stub::{FailingSink, MemorySink};
pub use test_utils::TestHarness;
