//! Row removal with everything the removed row owns.
//!
//! Each function records the deletions in the caller's change set and
//! returns the attachment files to unlink once the change set commits.

use calstore_types::ResourceId;

use crate::property::purge_properties;
use crate::tables::{CalendarRow, ChangeSet, HomeRow, NotificationHomeRow, ObjectRow, Tables};
use crate::transaction::AttachmentFile;

fn drop_resource(t: &Tables<'_>, c: &mut ChangeSet, id: ResourceId) {
    purge_properties(t, c, id);
    c.resources.delete(id);
}

pub(crate) fn remove_object(t: &Tables<'_>, c: &mut ChangeSet, row: &ObjectRow) -> Vec<AttachmentFile> {
    let mut files = Vec::new();
    for (key, attachment) in c.attachments.children(&t.attachments, row.resource_id) {
        if let Some(dropbox_id) = &row.dropbox_id {
            files.push((dropbox_id.clone(), attachment.name));
        }
        c.attachments.delete(key);
    }
    drop_resource(t, c, row.resource_id);
    c.objects.delete((row.calendar_id, row.name.clone()));
    files
}

pub(crate) fn remove_calendar(t: &Tables<'_>, c: &mut ChangeSet, row: &CalendarRow) -> Vec<AttachmentFile> {
    let mut files = Vec::new();
    for (_, object) in c.objects.children(&t.objects, row.resource_id) {
        files.extend(remove_object(t, c, &object));
    }
    drop_resource(t, c, row.resource_id);
    c.calendars.delete((row.home_id, row.name.clone()));
    files
}

pub(crate) fn remove_notification_home(t: &Tables<'_>, c: &mut ChangeSet, row: &NotificationHomeRow) {
    for (key, notification) in c.notifications.children(&t.notifications, row.resource_id) {
        drop_resource(t, c, notification.resource_id);
        c.notifications.delete(key);
    }
    drop_resource(t, c, row.resource_id);
    c.notification_homes.delete(row.owner_uid.clone());
}

pub(crate) fn remove_home(t: &Tables<'_>, c: &mut ChangeSet, row: &HomeRow) -> Vec<AttachmentFile> {
    let mut files = Vec::new();
    for (_, calendar) in c.calendars.children(&t.calendars, row.resource_id) {
        files.extend(remove_calendar(t, c, &calendar));
    }
    for (key, _) in c.shares.children(&t.shares, row.resource_id) {
        c.shares.delete(key);
    }
    if let Some(notifications) = c.notification_homes.get(&t.notification_homes, &row.owner_uid) {
        remove_notification_home(t, c, &notifications);
    }
    drop_resource(t, c, row.resource_id);
    c.homes.delete(row.owner_uid.clone());
    files
}
