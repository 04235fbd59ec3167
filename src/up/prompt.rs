#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub description: String,
}

const TITLE: &str = "dicekey";

impl Prompt {
    pub fn make_credential(rp_id: &str, rp_name: Option<&str>, user_display: Option<&str>) -> Self {
        let site = match rp_name {
            Some(name) => format!("{name} ({rp_id})"),
            None => rp_id.to_string(),
        };
        let account = user_display.unwrap_or("(unknown)");
        Self {
            title: TITLE.to_string(),
            description: format!(
                "Register new passkey\n\nSite: {site}\nAccount: {account}\n\nPress OK to create, or Cancel to deny."
            ),
        }
    }

    pub fn get_assertion(rp_id: &str, user_display: Option<&str>) -> Self {
        let account = user_display.unwrap_or("(unknown)");
        Self {
            title: TITLE.to_string(),
            description: format!(
                "Sign in with passkey\n\nSite: {rp_id}\nAccount: {account}\n\nPress OK to sign in, or Cancel to deny."
            ),
        }
    }

    pub fn select_account(rp_id: &str) -> Self {
        Self {
            title: TITLE.to_string(),
            description: format!("Choose an account for {rp_id}"),
        }
    }

    pub fn reset() -> Self {
        Self {
            title: TITLE.to_string(),
            description: "Delete ALL passkeys and the PIN?\n\nPress OK to reset, or Cancel to keep them."
                .to_string(),
        }
    }

    pub fn manage_credentials() -> Self {
        Self {
            title: TITLE.to_string(),
            description: "Allow this application to list and delete your passkeys?".to_string(),
        }
    }
}
