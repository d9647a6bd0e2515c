//! cron 표현식 해석
//!
//! 운영 화면은 5필드(분 시 일 월 요일) 표현식을 보내고, 요일은 0–7(0/7 = 일요일)
//! 관례를 따릅니다. `cron` 크레이트는 초 필드가 필요하고 요일이 1–7(1 = 일요일)이므로
//! 파싱 전에 변환합니다.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Local};

use crate::error::AppError;

/// 검증된 예약 스케줄
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, AppError> {
        let normalized = normalize(expression)?;
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| AppError::InvalidSchedule(format!("{}: {}", expression.trim(), e)))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// 사용자가 입력한 원래 표현식
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

/// 5필드 → 6필드 변환 및 요일 번호 재매핑
pub fn normalize(expression: &str) -> Result<String, AppError> {
    let invalid = |reason: &str| AppError::InvalidSchedule(format!("{}: {}", expression.trim(), reason));

    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(invalid(&format!("expected 5 or 6 fields, found {}", n))),
    }

    fields[5] = remap_day_of_week(&fields[5]).map_err(|reason| invalid(&reason))?;
    Ok(fields.join(" "))
}

/// 숫자 요일(0–7, 일요일 시작)을 1–7 목록으로 변환
///
/// 이름(MON, SUN-SAT 등)이 섞인 필드는 그대로 둡니다.
fn remap_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    if field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step: {}", item))?;
                if step == 0 {
                    return Err(format!("invalid day-of-week step: {}", item));
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (0, 6)
        } else if let Some((a, b)) = base.split_once('-') {
            (parse_day(a)?, parse_day(b)?)
        } else {
            let day = parse_day(base)?;
            (day, if step.is_some() { 6 } else { day })
        };
        if start > end {
            return Err(format!("invalid day-of-week range: {}", item));
        }

        let step = step.unwrap_or(1) as usize;
        for day in (start..=end).step_by(step) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_day(raw: &str) -> Result<u8, String> {
    match raw.parse::<u8>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week: {}", raw)),
    }
}
