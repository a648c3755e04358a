//! Family id resolution through the generic netlink controller

use tracing::{debug, warn};
use wlctl_codec::constants::ctrl;
use wlctl_codec::{IncomingMessage, MessageBuilder, OutboundMessage};

use crate::command::{CommandHandler, RequestContext};
use crate::error::{HalError, HalResult};

/// Ask the controller for the id of a named family
#[derive(Debug)]
pub struct ResolveFamily {
    name: String,
    family_id: Option<u16>,
}

impl ResolveFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family_id(&self) -> Option<u16> {
        self.family_id
    }
}

impl CommandHandler for ResolveFamily {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        if self.name.is_empty() {
            return Err(HalError::InvalidArgument);
        }
        // The controller has a fixed id regardless of the resolved family
        let mut builder =
            MessageBuilder::with_max_size(ctrl::FAMILY_ID, ctrl::CMD_GETFAMILY, ctx.max_message_size)?;
        builder.put_string(ctrl::ATTR_FAMILY_NAME, &self.name)?;
        Ok(builder.build()?)
    }

    fn handle_response(&mut self, reply: &IncomingMessage<'_>) {
        match reply.get_u16(ctrl::ATTR_FAMILY_ID) {
            Some(id) => {
                debug!(family = %self.name, id, "Resolved family");
                self.family_id = Some(id);
            }
            None => warn!(family = %self.name, "Controller reply carries no family id"),
        }
    }
}
