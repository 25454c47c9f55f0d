/*!
    define standard vehicle commands

    each command is a typed identifier: the id transmitted on the bus and the type of its value, known by both sides since frames carry no type information.
*/

use core::marker::PhantomData;
use crate::command::{self, CommandId, CommandValue, ValueType};


/**
    a command is a typed id on the bus.

    it only holds the command id, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Eq, Hash, Debug)]
pub struct Command<T> {
    id: CommandId,
    ty: PhantomData<T>,
}
impl<T> Command<T> {
    /// create a command from its id
    pub const fn new(id: CommandId) -> Self {
        assert!(id >= 1 && id <= command::MAX_ID, "command id out of range");
        Self{id, ty: PhantomData}
    }
    /// id on the bus
    pub const fn id(&self) -> CommandId {self.id}
}
impl<T: CommandValue> Command<T> {
    pub const fn value_type(&self) -> ValueType {T::TYPE}
    /// write a frame for this command at `buffer[offset ..]`
    pub fn encode(&self, value: T, buffer: &mut [u8], offset: usize) {
        command::encode(self.id, value, buffer, offset)
    }
    /// value of a frame sent for this command
    pub fn decode(&self, buffer: &[u8]) -> T {
        command::decode_value(buffer)
    }
}
impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {*self}
}
impl<T> Copy for Command<T> {}


/// motor speed setpoint, signed for direction
pub const MOTOR_SPEED: Command<i16> = Command::new(1);
/// steering setpoint, negative is left
pub const STEERING: Command<i16> = Command::new(2);
/// headlights mode
pub const HEADLIGHTS: Command<i16> = Command::new(3);
/// blinkers mode
pub const BLINKERS: Command<i16> = Command::new(4);
/// front ultrasonic distance in centimeters
pub const DISTANCE_FRONT: Command<f32> = Command::new(5);
/// rear ultrasonic distance in centimeters
pub const DISTANCE_REAR: Command<f32> = Command::new(6);
/// battery voltage in volts
pub const BATTERY_VOLTAGE: Command<f32> = Command::new(7);

/// first id free for application specific commands
pub const USER: CommandId = 0x20;



#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FRAME_SIZE, decode_id};

    #[test]
    fn typed_encoding() {
        let mut buffer = [0u8; FRAME_SIZE];
        STEERING.encode(-120, &mut buffer, 0);
        assert_eq!(decode_id(&buffer), STEERING.id());
        assert_eq!(STEERING.decode(&buffer), -120);
        assert_eq!(DISTANCE_FRONT.value_type(), ValueType::Float);
    }

    #[test]
    fn standard_ids_are_distinct() {
        let ids = [
            MOTOR_SPEED.id(), STEERING.id(), HEADLIGHTS.id(), BLINKERS.id(),
            DISTANCE_FRONT.id(), DISTANCE_REAR.id(), BATTERY_VOLTAGE.id(),
            ];
        for (i, a) in ids.iter().enumerate() {
            assert!(*a < USER);
            assert!(ids[i+1 ..].iter().all(|b| b != a));
        }
    }

    #[test]
    #[should_panic]
    fn reserved_id() {
        let _ = Command::<i16>::new(command::ACK_REQUEST);
    }
}
