//! Scheduled bucketed scanning
//!
//! Event mode. The request programs up to [`MAX_BUCKETS`] buckets, each a
//! period and a channel list; results arrive as new-scan-results
//! notifications until the subscription is cancelled.

use tracing::{debug, info};
use wlctl_codec::constants::{gscan, nl80211, vendor};
use wlctl_codec::{IncomingMessage, OutboundMessage};

use super::results::{decode_ssid_list, entry_tag};
use crate::command::{CommandHandler, RequestContext, RequestId, ResultHandler, SubscriptionKey};
use crate::error::{HalError, HalResult};

/// Most buckets one scan configuration may carry
pub const MAX_BUCKETS: usize = 8;

/// One scan bucket: channels scanned together every `period_ms`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSpec {
    pub bucket: u32,
    pub period_ms: u32,
    pub channels: Vec<u32>,
}

/// Scan configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanParams {
    pub buckets: Vec<BucketSpec>,
}

impl ScanParams {
    /// Single bucket scanning `channels` every `period_ms`
    pub fn single(period_ms: u32, channels: Vec<u32>) -> Self {
        Self {
            buckets: vec![BucketSpec {
                bucket: 0,
                period_ms,
                channels,
            }],
        }
    }
}

#[derive(Debug)]
pub struct ScanCommand {
    params: ScanParams,
    handler: ResultHandler,
    events_seen: u64,
}

impl ScanCommand {
    pub fn new(params: ScanParams, handler: ResultHandler) -> HalResult<Self> {
        if params.buckets.len() > MAX_BUCKETS {
            return Err(HalError::InvalidArgument);
        }
        Ok(Self {
            params,
            handler,
            events_seen: 0,
        })
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Notifications decoded so far
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }
}

impl CommandHandler for ScanCommand {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        let mut builder = ctx.vendor_request(vendor::OUI, vendor::SUBCMD_SET_CONFIG)?;
        let buckets = &self.params.buckets;

        builder.nested(nl80211::ATTR_VENDOR_DATA, |b| {
            b.put_u32(gscan::ATTR_NUM_BUCKETS, buckets.len() as u32)?;
            for (i, bucket) in buckets.iter().enumerate() {
                b.nested(entry_tag(i, 0)?, |b| {
                    b.put_u32(gscan::ATTR_BUCKET_ID, bucket.bucket)?
                        .put_u32(gscan::ATTR_BUCKET_PERIOD, bucket.period_ms)?
                        .put_u32(gscan::ATTR_BUCKET_NUM_CHANNELS, bucket.channels.len() as u32)?;
                    b.nested(gscan::ATTR_BUCKET_CHANNELS, |b| {
                        for (j, channel) in bucket.channels.iter().enumerate() {
                            b.put_u32(entry_tag(j, 0)?, *channel)?;
                        }
                        Ok(())
                    })?;
                    Ok(())
                })?;
            }
            Ok(())
        })?;

        Ok(builder.build()?)
    }

    fn handle_event(&mut self, id: RequestId, event: &IncomingMessage<'_>) {
        self.events_seen += 1;
        event.log();

        let Some(results) = decode_ssid_list(event) else {
            info!(%id, "Scan results event carries no SSIDs");
            return;
        };
        debug!(%id, count = results.len(), "Delivering scan results");
        self.handler.call(id, &results);
    }

    fn event_key(&self) -> Option<SubscriptionKey> {
        Some(SubscriptionKey::command(nl80211::CMD_NEW_SCAN_RESULTS))
    }

    fn cancel_request(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        Some(
            ctx.vendor_request(vendor::OUI, vendor::SUBCMD_STOP_GSCAN)
                .and_then(|builder| Ok(builder.build()?)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            family_id: 0x1c,
            interface_index: None,
            max_message_size: 4096,
        }
    }

    #[test]
    fn test_bucket_limit() {
        let params = ScanParams {
            buckets: (0..=MAX_BUCKETS as u32)
                .map(|bucket| BucketSpec {
                    bucket,
                    period_ms: 1000,
                    channels: vec![],
                })
                .collect(),
        };
        let result = ScanCommand::new(params, ResultHandler::new(|_, _| {}));
        assert!(matches!(result, Err(HalError::InvalidArgument)));
    }

    #[test]
    fn test_config_layout() {
        let command = ScanCommand::new(
            ScanParams::single(5000, vec![2412, 2437]),
            ResultHandler::new(|_, _| {}),
        )
        .unwrap();
        let message = command.build_request(&ctx()).unwrap();
        let parsed = IncomingMessage::parse_from(message.as_bytes()).unwrap();

        assert_eq!(parsed.vendor_subcommand(), Some(vendor::SUBCMD_SET_CONFIG));
        let data: Vec<_> = parsed.iterate(nl80211::ATTR_VENDOR_DATA).unwrap().collect();
        assert_eq!(data[0].tag(), gscan::ATTR_NUM_BUCKETS);
        assert_eq!(data[0].as_u32(), Some(1));

        let bucket: Vec<_> = data[1].nested().collect();
        assert_eq!(data[1].tag(), 0);
        assert_eq!(bucket[1].as_u32(), Some(5000));
        assert_eq!(bucket[2].as_u32(), Some(2));
        let channels: Vec<_> = bucket[3].nested().filter_map(|c| c.as_u32()).collect();
        assert_eq!(channels, vec![2412, 2437]);
    }

    #[test]
    fn test_oversized_channel_list_is_rejected() {
        let ctx = RequestContext {
            max_message_size: 1 << 20,
            ..ctx()
        };
        let channels = vec![2412; usize::from(u16::MAX) + 2];
        let command =
            ScanCommand::new(ScanParams::single(1000, channels), ResultHandler::new(|_, _| {}))
                .unwrap();
        assert_eq!(command.build_request(&ctx).unwrap_err(), HalError::InvalidArgument);
    }

    #[test]
    fn test_cancel_sends_stop() {
        let command =
            ScanCommand::new(ScanParams::default(), ResultHandler::new(|_, _| {})).unwrap();
        let stop = command.cancel_request(&ctx()).unwrap().unwrap();
        let parsed = IncomingMessage::parse_from(stop.as_bytes()).unwrap();
        assert_eq!(parsed.vendor_subcommand(), Some(vendor::SUBCMD_STOP_GSCAN));
    }
}
