pub mod bus;
pub mod caps;
pub mod cctv;
pub mod overlay;
pub mod pads;
pub mod recorder;
pub mod run;
pub mod tutorial;
