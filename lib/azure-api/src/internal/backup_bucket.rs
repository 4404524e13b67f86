use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupBucketConfig {
    pub immutability: Option<ImmutableConfig>,
    pub rotation_config: Option<RotationConfig>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImmutableConfig {
    pub retention_type: String,
    pub retention_period: String,
    pub locked: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RotationConfig {
    pub rotation_period_in_days: i32,
    pub expiration_period_in_days: Option<i32>,
}

impl ImmutableConfig {
    /// Parses `retention_period` ("24h", "90m", "1h30m", "3600s")
    pub fn retention_duration(&self) -> Option<Duration> {
        parse_duration(&self.retention_period)
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    if value.is_empty() {
        return None;
    }
    let mut total = 0u64;
    let mut number = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let amount: u64 = number.parse().ok()?;
        number.clear();
        total += match c {
            'h' => amount * 3600,
            'm' => amount * 60,
            's' => amount,
            _ => return None,
        };
    }
    if !number.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}
