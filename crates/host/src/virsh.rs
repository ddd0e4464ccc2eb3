// Thin wrappers around the `virsh` control tool: guest enumeration and
// channel discovery from the domain XML.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use negotiator_common::config::SUPPORTED_CHANNEL_NAMES;

/// Failure to enumerate the running guests.
///
/// Raised when `virsh list` itself fails, which usually means libvirtd is
/// not running; callers log a single line for it instead of a backtrace.
#[derive(Debug, Error)]
#[error("the `virsh list` command failed, most likely libvirtd is not running")]
pub struct GuestDiscoveryError;

/// [`Hypervisor`](crate::supervisor::Hypervisor) backed by the `virsh`
/// command line tool.
pub struct Virsh;

#[async_trait]
impl crate::supervisor::Hypervisor for Virsh {
    async fn running_guests(&self) -> Result<Vec<String>, GuestDiscoveryError> {
        find_running_guests().await
    }

    async fn channels_of_guest(&self, guest_name: &str) -> Result<HashMap<String, PathBuf>> {
        find_channels_of_guest(guest_name).await
    }
}

/// Names of the guests currently running on this host.
pub async fn find_running_guests() -> Result<Vec<String>, GuestDiscoveryError> {
    debug!("discovering running guests with `virsh list`");
    let output = virsh_output(&["--quiet", "list", "--all"])
        .await
        .map_err(|_| GuestDiscoveryError)?;
    Ok(parse_running_guests(&output))
}

/// Channel name to UNIX socket path map for one guest, taken from its
/// domain XML. Guests without negotiator channels yield an empty map.
pub async fn find_channels_of_guest(guest_name: &str) -> Result<HashMap<String, PathBuf>> {
    debug!(guest = guest_name, "discovering channels with `virsh dumpxml`");
    let xml = virsh_output(&["dumpxml", guest_name])
        .await
        .with_context(|| format!("failed to dump the domain XML of guest `{guest_name}`"))?;
    parse_channel_map(&xml)
}

async fn virsh_output(arguments: &[&str]) -> Result<String> {
    let output = Command::new("virsh")
        .args(arguments)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to run virsh")?;
    if !output.status.success() {
        bail!("`virsh {}` failed with {}", arguments.join(" "), output.status);
    }
    String::from_utf8(output.stdout).context("virsh produced output that is not valid UTF-8")
}

/// Parse `virsh list` output lines of the form `<id> <name> <status>`,
/// keeping the names with status `running`. Unparsable lines are skipped.
fn parse_running_guests(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(_id), Some(name)) = (fields.next(), fields.next()) else {
            warn!(line, "failed to parse `virsh list` output");
            continue;
        };
        let status = fields.collect::<Vec<_>>().join(" ");
        if status == "running" {
            names.push(name.to_string());
        }
    }
    names
}

/// Select `devices/channel` elements of type `unix` whose virtio target
/// carries one of the recognized channel names, mapping the name to the
/// source socket path.
fn parse_channel_map(xml: &str) -> Result<HashMap<String, PathBuf>> {
    #[derive(Default)]
    struct ChannelElement {
        channel_type: Option<String>,
        source_path: Option<String>,
        target_type: Option<String>,
        target_name: Option<String>,
    }

    let mut reader = Reader::from_str(xml);
    let mut channels = HashMap::new();
    let mut current: Option<ChannelElement> = None;

    loop {
        match reader.read_event().context("failed to parse domain XML")? {
            Event::Start(tag) if tag.name().as_ref() == b"channel" => {
                current = Some(ChannelElement {
                    channel_type: attribute(&tag, "type")?,
                    ..ChannelElement::default()
                });
            }
            Event::Start(tag) | Event::Empty(tag) => {
                if let Some(element) = current.as_mut() {
                    match tag.name().as_ref() {
                        b"source" => element.source_path = attribute(&tag, "path")?,
                        b"target" => {
                            element.target_type = attribute(&tag, "type")?;
                            element.target_name = attribute(&tag, "name")?;
                        }
                        _ => {}
                    }
                }
            }
            Event::End(tag) if tag.name().as_ref() == b"channel" => {
                if let Some(element) = current.take() {
                    if element.channel_type.as_deref() == Some("unix")
                        && element.target_type.as_deref() == Some("virtio")
                    {
                        if let (Some(name), Some(path)) =
                            (element.target_name, element.source_path)
                        {
                            if SUPPORTED_CHANNEL_NAMES.contains(&name.as_str()) {
                                channels.insert(name, PathBuf::from(path));
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(channels)
}

fn attribute(tag: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    tag.try_get_attribute(name)
        .with_context(|| format!("failed to read the `{name}` attribute"))?
        .map(|attribute| {
            attribute
                .unescape_value()
                .map(|value| value.into_owned())
                .with_context(|| format!("failed to decode the `{name}` attribute"))
        })
        .transpose()
}
