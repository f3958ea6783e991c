use daqhub::hal::mock::SimulatedDriver;
use daqhub::hal::{DeviceDescriptor, Range, TaskParameters};
use daqhub::validation::ParameterValidator;

fn device() -> DeviceDescriptor {
    let mut device = SimulatedDriver::default_device("X", "1");
    device.channel_count = 4;
    device.sample_rate_range = Range::new(10.0, 100_000.0);
    device.voltage_range = Range::new(-10.0, 10.0);
    device
}

fn params() -> TaskParameters {
    TaskParameters {
        board_index: 0,
        channel_count: 4,
        sample_rate: 1000.0,
        min_range: -10.0,
        max_range: 10.0,
    }
}

#[test]
fn test_valid_parameters_pass() {
    assert!(ParameterValidator::validate(&params(), &device(), 1).is_ok());
}

#[test]
fn test_range_bounds_are_inclusive() {
    let p = TaskParameters {
        sample_rate: 100_000.0,
        ..params()
    };
    assert!(ParameterValidator::validate(&p, &device(), 1).is_ok());

    let p = TaskParameters {
        sample_rate: 10.0,
        channel_count: 1,
        ..params()
    };
    assert!(ParameterValidator::validate(&p, &device(), 1).is_ok());
}

#[test]
fn test_zero_channels_rejected() {
    let p = TaskParameters {
        channel_count: 0,
        ..params()
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert_eq!(errors.fields(), vec!["channelCount"]);
}

#[test]
fn test_too_many_channels_rejected() {
    let p = TaskParameters {
        channel_count: 5,
        ..params()
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert!(errors.contains("channelCount"));
    assert!(errors.to_string().contains("exceeds"));
}

#[test]
fn test_non_positive_rate_rejected() {
    for rate in [0.0, -1000.0, f64::INFINITY] {
        let p = TaskParameters {
            sample_rate: rate,
            ..params()
        };
        let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
        assert_eq!(errors.fields(), vec!["sampleRate"], "rate {rate}");
    }
}

#[test]
fn test_rate_outside_device_range_rejected() {
    let p = TaskParameters {
        sample_rate: 200_000.0,
        ..params()
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert!(errors.contains("sampleRate"));
}

#[test]
fn test_inverted_voltage_range_rejected() {
    let p = TaskParameters {
        min_range: 5.0,
        max_range: -5.0,
        ..params()
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert_eq!(errors.fields(), vec!["minRange"]);

    let p = TaskParameters {
        min_range: 1.0,
        max_range: 1.0,
        ..params()
    };
    assert!(ParameterValidator::validate(&p, &device(), 1).is_err());
}

#[test]
fn test_voltage_outside_device_range_rejected() {
    let p = TaskParameters {
        min_range: -20.0,
        max_range: 20.0,
        ..params()
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert_eq!(errors.fields(), vec!["minRange", "maxRange"]);
}

#[test]
fn test_board_index_checked_against_driver() {
    let p = TaskParameters {
        board_index: 2,
        ..params()
    };
    assert!(ParameterValidator::validate(&p, &device(), 4).is_ok());

    let errors = ParameterValidator::validate(&p, &device(), 2).unwrap_err();
    assert_eq!(errors.fields(), vec!["boardIndex"]);
}

#[test]
fn test_every_violation_is_reported() {
    let p = TaskParameters {
        board_index: 9,
        channel_count: 0,
        sample_rate: -1.0,
        min_range: 50.0,
        max_range: f64::NAN,
    };
    let errors = ParameterValidator::validate(&p, &device(), 1).unwrap_err();
    assert_eq!(
        errors.fields(),
        vec!["boardIndex", "channelCount", "sampleRate", "minRange", "maxRange"]
    );
}

#[test]
fn test_buffer_footprint_limit() {
    // 100 samples x 4 channels x 8 bytes x 64 blocks = 204_800 bytes
    assert!(ParameterValidator::validate_footprint(&params(), 100, 64, 204_800).is_ok());

    let errors = ParameterValidator::validate_footprint(&params(), 100, 64, 204_799).unwrap_err();
    assert_eq!(errors.fields(), vec!["sampleRate"]);
    assert!(errors.to_string().contains("204800"));
}
