// Device profiles for the supported peripherals.
// Keep these in sync with the armband firmware and the motor shield sketch.

use std::time::Duration;
use uuid::Uuid;

// Armband control service.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0xd5060401_a904_deb9_4748_2c7f4a124842);
pub const INFO_CHARACTERISTIC: Uuid = Uuid::from_u128(0xd5060101_a904_deb9_4748_2c7f4a124842);

// One data characteristic per notification lane; the band round-robins
// sample packets across all four.
pub const EMG_CHARACTERISTICS: [Uuid; 4] = [
    Uuid::from_u128(0xd5060105_a904_deb9_4748_2c7f4a124842),
    Uuid::from_u128(0xd5060205_a904_deb9_4748_2c7f4a124842),
    Uuid::from_u128(0xd5060305_a904_deb9_4748_2c7f4a124842),
    Uuid::from_u128(0xd5060405_a904_deb9_4748_2c7f4a124842),
];

// Standard client configuration descriptor, present on every notifying
// characteristic.
pub const CLIENT_CONFIG_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

pub const EMG_CHANNEL_COUNT: usize = 8;
pub const EMG_SAMPLES_PER_NOTIFICATION: usize = 2;
pub const EMG_PAYLOAD_LEN: usize = EMG_CHANNEL_COUNT * EMG_SAMPLES_PER_NOTIFICATION;

// Command payloads written to COMMAND_CHARACTERISTIC.
pub const CMD_NEVER_SLEEP: [u8; 3] = [0x09, 0x01, 0x01];
pub const CMD_START_STREAMING: [u8; 5] = [0x01, 0x03, 0x02, 0x00, 0x00];
pub const CMD_STOP_STREAMING: [u8; 5] = [0x01, 0x03, 0x00, 0x00, 0x00];
pub const CMD_VIBRATE_SHORT: [u8; 3] = [0x03, 0x01, 0x01];
pub const CMD_VIBRATE_MEDIUM: [u8; 3] = [0x03, 0x01, 0x02];
pub const CMD_VIBRATE_LONG: [u8; 3] = [0x03, 0x01, 0x03];

// The band drops into sleep mode unless it sees a wake command now and then.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

// The firmware ignores a start-streaming command sent too soon after wake.
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_secs(3);

pub const SENSOR_NAME: &str = "Myo";

// Motor shield peripheral.
pub const MOTOR_CONTROL_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x8e400002_f315_4f60_9fb8_838830daea50);
pub const MOTOR_STATE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x8e400003_f315_4f60_9fb8_838830daea50);
pub const MOTOR_CHANNEL_COUNT: usize = 4;
