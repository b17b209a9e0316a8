use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::error::Result;
use crate::DoorState;

pub trait DoorSensor {
    fn read(&mut self) -> DoorState;
}

pub trait Indicator {
    fn set_active(&mut self, active: bool);

    fn is_active(&self) -> bool;
}

pub struct GpioDoorSensor(InputPin);

impl DoorSensor for GpioDoorSensor {
    fn read(&mut self) -> DoorState {
        self.0.read().into()
    }
}

pub struct GpioLed(OutputPin);

impl Indicator for GpioLed {
    fn set_active(&mut self, active: bool) {
        if active {
            self.0.set_high()
        } else {
            self.0.set_low()
        }
    }

    fn is_active(&self) -> bool {
        self.0.is_set_high()
    }
}

pub fn setup_gpio(door_pin: u8, led_pin: u8) -> Result<(GpioDoorSensor, GpioLed)> {
    let gpio = Gpio::new()?;
    let door = gpio.get(door_pin)?.into_input_pulldown();
    let mut led = gpio.get(led_pin)?.into_output();
    led.set_low();
    Ok((GpioDoorSensor(door), GpioLed(led)))
}
