//! smb.conf generation

use chrono::{DateTime, Utc};

use crate::domain::share::{Settings, Share};

use super::header;

/// Everything the Samba configuration is derived from
#[derive(Clone, Debug)]
pub struct SambaInput {
    pub settings: Settings,
    pub shares: Vec<Share>,
}

/// Render smb.conf: a `[global]` section then one section per share, in input order.
pub fn generate(input: &SambaInput, now: DateTime<Utc>) -> String {
    let mut out = header("Samba configuration", now);
    out.push('\n');
    out.push_str(&global_section(&input.settings));
    for share in &input.shares {
        out.push('\n');
        out.push_str(&share_section(share));
    }
    out
}

fn global_section(settings: &Settings) -> String {
    let mut lines = vec![
        "[global]".to_string(),
        format!("\tworkgroup = {}", settings.workgroup),
        "\tserver string = %h".to_string(),
        format!("\tnetbios name = {}", settings.server_name),
        format!("\trealm = {}", settings.domain),
        "\tsecurity = user".to_string(),
        "\tmap to guest = bad user".to_string(),
        "\tlog file = /var/log/samba/%m.log".to_string(),
        "\tmax log size = 50".to_string(),
        "\tdns proxy = no".to_string(),
        "\tunix extensions = no".to_string(),
        "\twide links = yes".to_string(),
        "\tprinting = cups".to_string(),
        "\tprintcap name = cups".to_string(),
        "\tload printers = yes".to_string(),
    ];

    if settings.domain_master {
        lines.push("\tdomain master = yes".to_string());
        lines.push("\tlocal master = yes".to_string());
        lines.push("\tpreferred master = yes".to_string());
        lines.push("\tos level = 65".to_string());
        lines.push("\twins support = yes".to_string());
    } else {
        lines.push("\tdomain master = no".to_string());
        lines.push("\tlocal master = no".to_string());
        lines.push("\tpreferred master = no".to_string());
        lines.push("\tos level = 20".to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn share_section(share: &Share) -> String {
    let mut lines = vec![
        format!("[{}]", share.name),
        format!("\tcomment = {}", share.name),
        format!("\tpath = {}", share.path),
        format!("\tbrowseable = {}", yes_no(share.visible)),
        format!("\twriteable = {}", yes_no(!share.readonly)),
    ];

    if !share.everyone && share.users.is_empty() {
        // An empty `valid users` means unrestricted to Samba; deny by disabling the share.
        lines.push("\tavailable = no".to_string());
    } else if !share.everyone {
        lines.push(format!("\tvalid users = {}", share.users.join(" ")));
        if !share.readonly && !share.write_users.is_empty() {
            lines.push(format!("\twrite list = {}", share.write_users.join(" ")));
        }
    }

    if share.guest_access {
        lines.push("\tguest ok = yes".to_string());
        if share.guest_writeable && !share.readonly {
            lines.push("\tguest only = yes".to_string());
        }
    } else {
        lines.push("\tguest ok = no".to_string());
    }

    lines.push("\tcreate mask = 0775".to_string());
    lines.push("\tforce create mode = 0664".to_string());
    lines.push("\tdirectory mask = 0775".to_string());
    lines.push("\tforce directory mode = 0775".to_string());

    if share.disk_pool_copies > 0 {
        lines.push("\tvfs objects = greyhole".to_string());
        lines.push("\tdfree command = /usr/bin/greyhole-dfree".to_string());
    }

    if let Some(ref extras) = share.extras {
        lines.extend(
            extras
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| format!("\t{}", l)),
        );
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
