//! Subscription and notification model, and the `GetStreamingEvents`
//! request the streaming connection is opened with.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{EwsError, EwsResult};
use crate::operation::{ErrorHandlingMode, Operation};
use crate::response::ResponseClass;
use crate::version::ServerVersion;
use crate::xml::{XmlElement, XmlNamespace, XmlReader, XmlWriter};

/// Operation name of the streaming request.
pub const GET_STREAMING_EVENTS: &str = "GetStreamingEvents";

/// Accepted range for a streaming connection's lifetime, in minutes.
pub const CONNECTION_LIFETIME_MINUTES: std::ops::RangeInclusive<u32> = 1..=30;

/// Kind of change a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Heartbeat; never surfaced to listeners.
    Status,
    /// New mail arrived.
    NewMail,
    /// Deleted.
    Deleted,
    /// Modified.
    Modified,
    /// Moved to another folder.
    Moved,
    /// Copied to another folder.
    Copied,
    /// Created.
    Created,
    /// Free/busy information changed.
    FreeBusyChanged,
}

impl EventType {
    /// The `t:{X}Event` element name.
    pub const fn element_name(self) -> &'static str {
        match self {
            Self::Status => "StatusEvent",
            Self::NewMail => "NewMailEvent",
            Self::Deleted => "DeletedEvent",
            Self::Modified => "ModifiedEvent",
            Self::Moved => "MovedEvent",
            Self::Copied => "CopiedEvent",
            Self::Created => "CreatedEvent",
            Self::FreeBusyChanged => "FreeBusyChangedEvent",
        }
    }

    /// Maps an event element name back to the type.
    pub fn from_element_name(name: &str) -> Option<Self> {
        Some(match name {
            "StatusEvent" => Self::Status,
            "NewMailEvent" => Self::NewMail,
            "DeletedEvent" => Self::Deleted,
            "ModifiedEvent" => Self::Modified,
            "MovedEvent" => Self::Moved,
            "CopiedEvent" => Self::Copied,
            "CreatedEvent" => Self::Created,
            "FreeBusyChangedEvent" => Self::FreeBusyChanged,
            _ => return None,
        })
    }

    /// Whether the event carries the previous location of the object.
    pub const fn has_old_location(self) -> bool {
        matches!(self, Self::Moved | Self::Copied)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.element_name();
        f.write_str(name.strip_suffix("Event").unwrap_or(name))
    }
}

/// A server-side item or folder id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// The `Id` attribute.
    pub id: String,
    /// The `ChangeKey` attribute, if present.
    pub change_key: Option<String>,
}

impl EntityId {
    /// An id without a change key.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_key: None,
        }
    }

    fn from_element(element: &XmlElement) -> EwsResult<Self> {
        let id = element.attribute("Id").ok_or_else(|| {
            EwsError::deserialization(format!("<{}> has no Id attribute", element.local_name))
        })?;
        Ok(Self {
            id: id.to_string(),
            change_key: element.attribute("ChangeKey").map(str::to_string),
        })
    }
}

/// A change to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    /// What happened.
    pub event_type: EventType,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Cursor after this event, if the server sent one.
    pub watermark: Option<String>,
    /// Folder the item is in now.
    pub parent_folder_id: EntityId,
    /// The item.
    pub item_id: EntityId,
    /// Id before a move or copy.
    pub old_item_id: Option<EntityId>,
    /// Folder before a move or copy.
    pub old_parent_folder_id: Option<EntityId>,
}

/// A change to a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEvent {
    /// What happened.
    pub event_type: EventType,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Cursor after this event, if the server sent one.
    pub watermark: Option<String>,
    /// Parent of the folder now.
    pub parent_folder_id: EntityId,
    /// The folder.
    pub folder_id: EntityId,
    /// Id before a move or copy.
    pub old_folder_id: Option<EntityId>,
    /// Parent before a move or copy.
    pub old_parent_folder_id: Option<EntityId>,
    /// Unread count, reported with `Modified` only.
    pub unread_count: Option<u32>,
}

/// One notification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// An item changed.
    Item(ItemEvent),
    /// A folder changed.
    Folder(FolderEvent),
}

impl NotificationEvent {
    /// What happened.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Item(event) => event.event_type,
            Self::Folder(event) => event.event_type,
        }
    }

    /// When it happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Item(event) => event.timestamp,
            Self::Folder(event) => event.timestamp,
        }
    }

    /// The containing folder.
    pub fn parent_folder_id(&self) -> &EntityId {
        match self {
            Self::Item(event) => &event.parent_folder_id,
            Self::Folder(event) => &event.parent_folder_id,
        }
    }

    /// Cursor after this event.
    pub fn watermark(&self) -> Option<&str> {
        match self {
            Self::Item(event) => event.watermark.as_deref(),
            Self::Folder(event) => event.watermark.as_deref(),
        }
    }
}

/// Everything an event element may hold, before it is given a shape.
#[derive(Default)]
struct RawEvent {
    watermark: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    item_id: Option<EntityId>,
    folder_id: Option<EntityId>,
    parent_folder_id: Option<EntityId>,
    old_item_id: Option<EntityId>,
    old_folder_id: Option<EntityId>,
    old_parent_folder_id: Option<EntityId>,
    unread_count: Option<u32>,
}

impl RawEvent {
    /// Reads the children of the event element the reader is inside of,
    /// and leaves it.
    fn read(reader: &mut XmlReader) -> EwsResult<Self> {
        let mut raw = Self::default();
        while !reader.at_end_of_element() {
            let element = reader.read_any_start_element()?;
            if element.namespace != XmlNamespace::Types {
                reader.skip_current_element()?;
                continue;
            }
            match element.local_name.as_str() {
                "Watermark" => raw.watermark = Some(reader.read_value()?),
                "TimeStamp" => raw.timestamp = Some(reader.read_value()?),
                "UnreadCount" => raw.unread_count = Some(reader.read_value()?),
                name => {
                    let slot = match name {
                        "ItemId" => &mut raw.item_id,
                        "FolderId" => &mut raw.folder_id,
                        "ParentFolderId" => &mut raw.parent_folder_id,
                        "OldItemId" => &mut raw.old_item_id,
                        "OldFolderId" => &mut raw.old_folder_id,
                        "OldParentFolderId" => &mut raw.old_parent_folder_id,
                        _ => {
                            reader.skip_current_element()?;
                            continue;
                        }
                    };
                    *slot = Some(EntityId::from_element(&element)?);
                    reader.skip_current_element()?;
                }
            }
        }
        reader.read_current_end()?;
        Ok(raw)
    }

    fn into_event(self, event_type: EventType) -> EwsResult<NotificationEvent> {
        let missing = |what: &str| {
            EwsError::deserialization(format!("{} has no {what}", event_type.element_name()))
        };
        let timestamp = self.timestamp.ok_or_else(|| missing("TimeStamp"))?;
        let parent_folder_id = self
            .parent_folder_id
            .ok_or_else(|| missing("ParentFolderId"))?;
        let moved = event_type.has_old_location();

        if let Some(item_id) = self.item_id {
            let (old_item_id, old_parent_folder_id) = if moved {
                (
                    Some(self.old_item_id.ok_or_else(|| missing("OldItemId"))?),
                    Some(
                        self.old_parent_folder_id
                            .ok_or_else(|| missing("OldParentFolderId"))?,
                    ),
                )
            } else {
                (None, None)
            };
            return Ok(NotificationEvent::Item(ItemEvent {
                event_type,
                timestamp,
                watermark: self.watermark,
                parent_folder_id,
                item_id,
                old_item_id,
                old_parent_folder_id,
            }));
        }

        let folder_id = self
            .folder_id
            .ok_or_else(|| missing("ItemId or FolderId"))?;
        let (old_folder_id, old_parent_folder_id) = if moved {
            (
                Some(self.old_folder_id.ok_or_else(|| missing("OldFolderId"))?),
                Some(
                    self.old_parent_folder_id
                        .ok_or_else(|| missing("OldParentFolderId"))?,
                ),
            )
        } else {
            (None, None)
        };
        Ok(NotificationEvent::Folder(FolderEvent {
            event_type,
            timestamp,
            watermark: self.watermark,
            parent_folder_id,
            folder_id,
            old_folder_id,
            old_parent_folder_id,
            unread_count: self
                .unread_count
                .filter(|_| event_type == EventType::Modified),
        }))
    }
}

/// The events one notification carries for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationGroup {
    /// The subscription the events belong to.
    pub subscription_id: String,
    /// Cursor before the first event.
    pub previous_watermark: Option<String>,
    /// Whether the server holds more events than it sent.
    pub more_events: bool,
    /// Events in server order. Status events are not included.
    pub events: Vec<NotificationEvent>,
    /// Last watermark seen in the group, status events included.
    pub last_watermark: Option<String>,
}

impl NotificationGroup {
    /// Reads an `m:Notification` element.
    pub fn read(reader: &mut XmlReader) -> EwsResult<Self> {
        reader.read_start_element(XmlNamespace::Messages, "Notification")?;
        let mut group = Self::default();
        let mut has_id = false;

        while !reader.at_end_of_element() {
            let element = reader.read_any_start_element()?;
            match element.local_name.as_str() {
                "SubscriptionId" => {
                    group.subscription_id = reader.read_value()?;
                    has_id = true;
                }
                "PreviousWatermark" => group.previous_watermark = Some(reader.read_value()?),
                "MoreEvents" => group.more_events = reader.read_value()?,
                name => match EventType::from_element_name(name) {
                    Some(event_type) if element.namespace == XmlNamespace::Types => {
                        let raw = RawEvent::read(reader)?;
                        if let Some(watermark) = &raw.watermark {
                            group.last_watermark = Some(watermark.clone());
                        }
                        if event_type == EventType::Status {
                            trace!(subscription_id = %group.subscription_id, "Status event");
                            continue;
                        }
                        group.events.push(raw.into_event(event_type)?);
                    }
                    _ => reader.skip_current_element()?,
                },
            }
        }
        reader.read_end_element(XmlNamespace::Messages, "Notification")?;

        if !has_id || group.subscription_id.is_empty() {
            return Err(EwsError::deserialization(
                "notification has no SubscriptionId",
            ));
        }
        Ok(group)
    }

    /// Whether any listener-visible events are present.
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

/// `ConnectionStatus` of a streaming response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// The connection stays open.
    Ok,
    /// The server is closing the connection.
    Closed,
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "Closed" => Ok(Self::Closed),
            other => Err(format!("unknown connection status {other:?}")),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Closed => "Closed",
        })
    }
}

crate::xml_value_from_str!(ConnectionStatus);

/// Payload of a `GetStreamingEventsResponseMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingResponse {
    /// Connection status, when the message reports one.
    pub connection_status: Option<ConnectionStatus>,
    /// Notifications, one group per subscription.
    pub notifications: Vec<NotificationGroup>,
    /// Subscriptions an error message applies to.
    pub error_subscription_ids: Vec<String>,
}

impl StreamingResponse {
    /// Reads the payload elements of a streaming response message.
    pub fn read(reader: &mut XmlReader, _class: ResponseClass) -> EwsResult<Self> {
        let mut response = Self::default();
        loop {
            if reader.is_start_element(XmlNamespace::Messages, "Notifications") {
                reader.read_start_element(XmlNamespace::Messages, "Notifications")?;
                while !reader.at_end_of_element() {
                    response.notifications.push(NotificationGroup::read(reader)?);
                }
                reader.read_end_element(XmlNamespace::Messages, "Notifications")?;
            } else if reader.is_start_element(XmlNamespace::Messages, "ErrorSubscriptionIds") {
                reader.read_start_element(XmlNamespace::Messages, "ErrorSubscriptionIds")?;
                while !reader.at_end_of_element() {
                    let element = reader.read_any_start_element()?;
                    if element.local_name == "SubscriptionId" {
                        response.error_subscription_ids.push(reader.read_value()?);
                    } else {
                        reader.skip_current_element()?;
                    }
                }
                reader.read_end_element(XmlNamespace::Messages, "ErrorSubscriptionIds")?;
            } else if reader.is_start_element(XmlNamespace::Messages, "ConnectionStatus") {
                response.connection_status =
                    Some(reader.read_element_value(XmlNamespace::Messages, "ConnectionStatus")?);
            } else if reader.at_end_of_element() {
                break;
            } else {
                reader.skip_element()?;
            }
        }
        Ok(response)
    }
}

/// How a subscription delivers its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Polled with `GetEvents`.
    Pull,
    /// Posted to a callback URL.
    Push,
    /// Delivered over a hanging connection.
    Streaming,
}

/// A server-side subscription handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Server-issued id.
    pub id: String,
    /// Cursor, for subscriptions that use one.
    pub watermark: Option<String>,
    /// Delivery mechanism.
    pub kind: SubscriptionKind,
}

impl Subscription {
    /// A streaming subscription.
    pub fn streaming(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            watermark: None,
            kind: SubscriptionKind::Streaming,
        }
    }

    /// A pull subscription starting at `watermark`.
    pub fn pull(id: impl Into<String>, watermark: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            watermark: Some(watermark.into()),
            kind: SubscriptionKind::Pull,
        }
    }

    /// A push subscription starting at `watermark`.
    pub fn push(id: impl Into<String>, watermark: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            watermark: Some(watermark.into()),
            kind: SubscriptionKind::Push,
        }
    }

    /// Streaming subscriptions are ordered by the connection, not a cursor.
    pub fn uses_watermark(&self) -> bool {
        self.kind != SubscriptionKind::Streaming
    }

    /// Moves the cursor past a group of this subscription's events.
    ///
    /// Returns `true` if the watermark changed.
    pub fn advance_watermark(&mut self, group: &NotificationGroup) -> bool {
        if !self.uses_watermark() || group.subscription_id != self.id {
            return false;
        }
        match &group.last_watermark {
            Some(next) if self.watermark.as_ref() != Some(next) => {
                self.watermark = Some(next.clone());
                true
            }
            _ => false,
        }
    }
}

/// Builds the `GetStreamingEvents` operation for a set of subscriptions.
///
/// # Errors
///
/// Returns a validation error when `subscription_ids` is empty, holds an
/// empty id, or `lifetime_minutes` is outside
/// [`CONNECTION_LIFETIME_MINUTES`].
pub fn get_streaming_events_operation<I, S>(
    subscription_ids: I,
    lifetime_minutes: u32,
) -> EwsResult<Operation<StreamingResponse>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: Vec<String> = subscription_ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
        return Err(EwsError::validation(
            "a streaming connection needs at least one subscription",
        ));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(EwsError::validation("subscription id is empty"));
    }
    if !CONNECTION_LIFETIME_MINUTES.contains(&lifetime_minutes) {
        return Err(EwsError::validation(format!(
            "connection lifetime must be {}..={} minutes, got {lifetime_minutes}",
            CONNECTION_LIFETIME_MINUTES.start(),
            CONNECTION_LIFETIME_MINUTES.end()
        )));
    }

    Operation::builder(GET_STREAMING_EVENTS)
        .minimum_version(ServerVersion::Exchange2010_SP1)
        .error_mode(ErrorHandlingMode::ReturnErrors)
        .write_body(move |writer: &mut XmlWriter| {
            writer.write_start_element(XmlNamespace::Messages, "SubscriptionIds")?;
            for id in &ids {
                writer.write_element_value(XmlNamespace::Types, "SubscriptionId", id.clone())?;
            }
            writer.write_end_element()?;
            writer.write_element_value(
                XmlNamespace::Messages,
                "ConnectionTimeout",
                lifetime_minutes,
            )?;
            Ok(())
        })
        .parse_message(StreamingResponse::read)
        .build()
}
