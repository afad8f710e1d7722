mod common;
mod cycle_detection;
mod evaluation;
mod functions;
mod named_ranges;
