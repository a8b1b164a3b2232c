//! Change-of-Value Subscription and Notification
//!
//! SubscribeCOV establishes or cancels a subscription on a monitored
//! object; notifications (confirmed service 1 or unconfirmed service 2)
//! carry the subscriber process, the initiating device, the monitored
//! object, the remaining lifetime, and the changed property values inside
//! `[4]`.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    encode_closing_tag, encode_context_boolean, encode_context_object_id, encode_context_unsigned,
    encode_opening_tag, ApplicationValue, TagReader,
};
use crate::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
use crate::service::{Result, ServiceError};
use crate::util::is_valid_priority;

/// SubscribeCOV-Request
///
/// Omitting both `issue_confirmed_notifications` and `lifetime_seconds`
/// cancels the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeCovRequest {
    pub subscriber_process_identifier: u32,
    pub monitored_object_identifier: ObjectIdentifier,
    pub issue_confirmed_notifications: Option<bool>,
    pub lifetime_seconds: Option<u32>,
}

impl SubscribeCovRequest {
    pub fn new(subscriber_process_identifier: u32, monitored_object_identifier: ObjectIdentifier) -> Self {
        Self {
            subscriber_process_identifier,
            monitored_object_identifier,
            issue_confirmed_notifications: None,
            lifetime_seconds: None,
        }
    }

    pub fn with_confirmed_notifications(mut self, confirmed: bool) -> Self {
        self.issue_confirmed_notifications = Some(confirmed);
        self
    }

    pub fn with_lifetime(mut self, lifetime_seconds: u32) -> Self {
        self.lifetime_seconds = Some(lifetime_seconds);
        self
    }

    /// True when the request cancels an existing subscription
    pub fn is_cancellation(&self) -> bool {
        self.issue_confirmed_notifications.is_none() && self.lifetime_seconds.is_none()
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_unsigned(buffer, 0, self.subscriber_process_identifier as u64)?;
        encode_context_object_id(
            buffer,
            1,
            self.monitored_object_identifier.object_type.into(),
            self.monitored_object_identifier.instance,
        )?;
        if let Some(confirmed) = self.issue_confirmed_notifications {
            encode_context_boolean(buffer, 2, confirmed)?;
        }
        if let Some(lifetime) = self.lifetime_seconds {
            encode_context_unsigned(buffer, 3, lifetime as u64)?;
        }
        Ok(())
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let process_id = reader.context_unsigned(0)?;
        if process_id > u32::MAX as u64 {
            return Err(ServiceError::ValueOutOfRange("subscriber-process-identifier"));
        }
        let (object_type, instance) = reader.context_object_id(1)?;
        let issue_confirmed = if reader.at_context(2) {
            Some(reader.context_boolean(2)?)
        } else {
            None
        };
        let lifetime = if reader.at_context(3) {
            Some(reader.context_unsigned(3)? as u32)
        } else {
            None
        };
        if reader.has_data() {
            return Err(ServiceError::UnexpectedField("subscribe-cov-request"));
        }
        Ok(Self {
            subscriber_process_identifier: process_id as u32,
            monitored_object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            issue_confirmed_notifications: issue_confirmed,
            lifetime_seconds: lifetime,
        })
    }
}

/// One changed property inside a COV notification
#[derive(Debug, Clone, PartialEq)]
pub struct CovPropertyValue {
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    pub value: ApplicationValue,
    pub priority: Option<u8>,
}

/// COV notification body, shared by the confirmed and unconfirmed forms
#[derive(Debug, Clone, PartialEq)]
pub struct CovNotification {
    pub subscriber_process_identifier: u32,
    pub initiating_device_identifier: ObjectIdentifier,
    pub monitored_object_identifier: ObjectIdentifier,
    pub time_remaining_seconds: u32,
    pub values: Vec<CovPropertyValue>,
}

impl CovNotification {
    pub fn new(
        subscriber_process_identifier: u32,
        initiating_device_instance: u32,
        monitored_object_identifier: ObjectIdentifier,
        time_remaining_seconds: u32,
    ) -> Self {
        Self {
            subscriber_process_identifier,
            initiating_device_identifier: ObjectIdentifier::new(
                ObjectType::Device,
                initiating_device_instance,
            ),
            monitored_object_identifier,
            time_remaining_seconds,
            values: Vec::new(),
        }
    }

    pub fn add_value(mut self, value: CovPropertyValue) -> Self {
        self.values.push(value);
        self
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_unsigned(buffer, 0, self.subscriber_process_identifier as u64)?;
        encode_context_object_id(
            buffer,
            1,
            self.initiating_device_identifier.object_type.into(),
            self.initiating_device_identifier.instance,
        )?;
        encode_context_object_id(
            buffer,
            2,
            self.monitored_object_identifier.object_type.into(),
            self.monitored_object_identifier.instance,
        )?;
        encode_context_unsigned(buffer, 3, self.time_remaining_seconds as u64)?;

        encode_opening_tag(buffer, 4)?;
        for item in &self.values {
            encode_context_unsigned(buffer, 0, u32::from(item.property_identifier) as u64)?;
            if let Some(index) = item.array_index {
                encode_context_unsigned(buffer, 1, index as u64)?;
            }
            encode_opening_tag(buffer, 2)?;
            item.value.encode(buffer)?;
            encode_closing_tag(buffer, 2)?;
            if let Some(priority) = item.priority {
                if !is_valid_priority(priority) {
                    return Err(ServiceError::ValueOutOfRange("priority"));
                }
                encode_context_unsigned(buffer, 3, priority as u64)?;
            }
        }
        encode_closing_tag(buffer, 4)?;
        Ok(())
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);

        let process_id = reader.context_unsigned(0)?;
        let (device_type, device_instance) = reader.context_object_id(1)?;
        if device_type != u16::from(ObjectType::Device) {
            return Err(ServiceError::UnexpectedField("initiating-device-identifier"));
        }
        let (object_type, instance) = reader.context_object_id(2)?;
        let time_remaining = reader.context_unsigned(3)?;

        let mut values = Vec::new();
        reader.open(4)?;
        while !reader.at_closing(4) {
            let property = reader.context_unsigned(0)?;
            let array_index = if reader.at_context(1) {
                Some(reader.context_unsigned(1)? as u32)
            } else {
                None
            };
            reader.open(2)?;
            let value = reader.application_value()?;
            reader.close(2)?;
            let priority = if reader.at_context(3) {
                Some(reader.context_unsigned(3)? as u8)
            } else {
                None
            };
            values.push(CovPropertyValue {
                property_identifier: PropertyIdentifier::from(property as u32),
                array_index,
                value,
                priority,
            });
        }
        reader.close(4)?;

        Ok(Self {
            subscriber_process_identifier: process_id as u32,
            initiating_device_identifier: ObjectIdentifier::new(
                ObjectType::Device,
                device_instance,
            ),
            monitored_object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            time_remaining_seconds: time_remaining as u32,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::BitString;

    #[test]
    fn test_subscribe_round_trip() {
        let request = SubscribeCovRequest::new(
            18,
            ObjectIdentifier::new(ObjectType::AnalogInput, 10),
        )
        .with_confirmed_notifications(false)
        .with_lifetime(120);

        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = SubscribeCovRequest::decode(&body).unwrap();
        assert_eq!(decoded, request);
        assert!(!decoded.is_cancellation());
    }

    #[test]
    fn test_subscription_cancellation() {
        let request = SubscribeCovRequest::new(
            18,
            ObjectIdentifier::new(ObjectType::AnalogInput, 10),
        );
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = SubscribeCovRequest::decode(&body).unwrap();
        assert!(decoded.is_cancellation());
    }

    #[test]
    fn test_notification_round_trip() {
        let mut status_flags = BitString::new();
        status_flags.set_bit(3, false).unwrap();

        let notification = CovNotification::new(
            18,
            4,
            ObjectIdentifier::new(ObjectType::AnalogInput, 10),
            45,
        )
        .add_value(CovPropertyValue {
            property_identifier: PropertyIdentifier::PresentValue,
            array_index: None,
            value: ApplicationValue::Real(21.5),
            priority: None,
        })
        .add_value(CovPropertyValue {
            property_identifier: PropertyIdentifier::StatusFlags,
            array_index: None,
            value: ApplicationValue::BitString(status_flags),
            priority: None,
        });

        let mut body = Vec::new();
        notification.encode(&mut body).unwrap();
        let decoded = CovNotification::decode(&body).unwrap();
        assert_eq!(decoded, notification);
        assert_eq!(decoded.values.len(), 2);
        assert_eq!(decoded.time_remaining_seconds, 45);
    }

    #[test]
    fn test_notification_requires_device_identifier() {
        let mut body = Vec::new();
        encode_context_unsigned(&mut body, 0, 1).unwrap();
        encode_context_object_id(&mut body, 1, 0, 5).unwrap();
        encode_context_object_id(&mut body, 2, 0, 10).unwrap();
        encode_context_unsigned(&mut body, 3, 0).unwrap();
        encode_opening_tag(&mut body, 4).unwrap();
        encode_closing_tag(&mut body, 4).unwrap();
        assert!(CovNotification::decode(&body).is_err());
    }
}
