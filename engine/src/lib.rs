// nitta — synthesis engine for dataflow algorithms over bus-connected
// processing units.
//
// Library root. Leaves first: values and time, then the IR, the process
// record, the PU variants, the bus network, and the synthesis driver on
// top.

pub mod accum;
pub mod bus;
pub mod divider;
pub mod endpoint;
pub mod error;
pub mod fram;
pub mod front;
pub mod ir;
pub mod multiplier;
pub mod problem;
pub mod process;
pub mod pu;
pub mod score;
pub(crate) mod serial;
pub mod shift;
pub mod simulator;
pub mod spi;
pub mod synthesis;
pub mod testbench;
pub mod time;
pub mod value;
