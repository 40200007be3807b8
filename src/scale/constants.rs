use uuid::Uuid;

/**
 * How long (milliseconds) to wait for the first valid measurement after subscribing.
 */
pub const MEASUREMENT_TIMEOUT: u64 = 30_000;

/**
 * How long (milliseconds) to listen for advertisements.
 */
pub const SCAN_DURATION: u64 = 5_000;

/**
 * How long (milliseconds) opening the connection and resolving services may take.
 */
pub const CONNECT_DEADLINE: u64 = 20_000;

/**
 * How long (milliseconds) a battery read may take.
 */
pub const READ_DEADLINE: u64 = 2_000;

/**
 * Capacity of the channel between the characteristic bridges and the workflow.
 */
pub const NOTIFICATION_BUFFER: usize = 64;

pub const WEIGHT_SERVICE: Uuid = Uuid::from_u128(0x0000181d_0000_1000_8000_00805f9b34fb);
pub const WEIGHT_MEASUREMENT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a98_0000_1000_8000_00805f9b34fb);

pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const BATTERY_LEVEL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/**
 * Body composition and vendor services. Resolved when offered, never required.
 */
pub const VENDOR_SERVICES: [Uuid; 4] = [
    Uuid::from_u128(0x0000181b_0000_1000_8000_00805f9b34fb), // body composition
    Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x00001530_0000_3512_2118_0009af100700), // Huami
];

pub const SCALE_NAMES: [&str; 1] = ["MI_SCALE"];
pub const SCALE_NAME_PREFIXES: [&str; 2] = ["MIBFS", "MI"];

/**
 * Height used for BMI when the user's height is unknown.
 */
pub const DEFAULT_HEIGHT_M: f64 = 1.70;

/**
 * Weight values are transmitted in units of 5 grams.
 */
pub const WEIGHT_SCALE: f64 = 200.0;

/**
 * Plausible input ranges for manual entry.
 */
pub const MANUAL_WEIGHT_RANGE_KG: (f64, f64) = (30.0, 300.0);
pub const MANUAL_GIRTH_RANGE_CM: (f64, f64) = (50.0, 150.0);

/**
 * Population-average placeholders used for the composition fields of a manual reading.
 * These are not measured values; they keep manual records in the same shape as scale records.
 */
pub const PLACEHOLDER_BODY_FAT_PERCENT: f64 = 25.0;
pub const PLACEHOLDER_MUSCLE_MASS_KG: f64 = 50.0;
pub const PLACEHOLDER_WATER_PERCENT: f64 = 55.0;
pub const PLACEHOLDER_BONE_MASS_KG: f64 = 2.8;
pub const PLACEHOLDER_VISCERAL_FAT_INDEX: u8 = 8;
pub const PLACEHOLDER_METABOLIC_AGE_YEARS: u8 = 35;
