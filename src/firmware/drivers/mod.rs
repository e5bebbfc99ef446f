//! Vendor HAL adapters implementing the capability traits in
//! `firmware::hal`. Nothing above this module touches `embassy_stm32`
//! directly.

pub mod adc;
pub mod encoder;
pub mod gate_driver;
pub mod pwm;
pub mod step_dir_interface;
