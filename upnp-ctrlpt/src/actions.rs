//! Actions addressed by device number

use serde_json::{json, Value};
use tracing::debug;
use upnp_sdk::ActionRequest;

use crate::control_point::ControlPoint;
use crate::error::Result;
use crate::registry::ServiceState;

/// Index of the control service in the default profile
pub const CONTROL_SERVICE: usize = 0;

/// Credentials for [`ProprietaryCommand::ConnectToAp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub password: String,
    pub security: u32,
    pub security_type: String,
}

/// Vendor commands carried as JSON instead of a SOAP envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProprietaryCommand {
    GetApList,
    ConnectToAp(AccessPoint),
    CloseAp,
    GetProductInfo,
    SetName(String),
}

impl ProprietaryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ProprietaryCommand::GetApList => "getAPList",
            ProprietaryCommand::ConnectToAp(_) => "connectToAP",
            ProprietaryCommand::CloseAp => "closeAP",
            ProprietaryCommand::GetProductInfo => "getProductInfo",
            ProprietaryCommand::SetName(_) => "setName",
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            ProprietaryCommand::GetApList => 1,
            ProprietaryCommand::ConnectToAp(_) => 2,
            ProprietaryCommand::CloseAp => 3,
            ProprietaryCommand::GetProductInfo => 4,
            ProprietaryCommand::SetName(_) => 5,
        }
    }

    fn parameters(&self) -> Value {
        match self {
            ProprietaryCommand::ConnectToAp(ap) => json!({
                "password": ap.password,
                "SSID": ap.ssid,
                "security": ap.security,
                "securityType": ap.security_type,
            }),
            ProprietaryCommand::SetName(name) => json!({ "name": name }),
            _ => json!({}),
        }
    }

    /// The request body
    pub fn to_json(&self) -> Value {
        json!({
            "command": {
                "commandName": self.name(),
                "commandValue": self.value(),
                "commandType": "proprietary",
            },
            "parameters": self.parameters(),
        })
    }
}

impl ControlPoint {
    /// Invoke `action_name` on service `service` of device `devnum`
    ///
    /// The response arrives asynchronously and is logged.
    pub fn send_action(
        &self,
        service: usize,
        devnum: usize,
        action_name: &str,
        args: &[(String, String)],
    ) -> Result<()> {
        let (udn, state) = self.registry.service(devnum, service)?;
        debug!(udn = %udn, action = action_name, control_url = %state.control_url, "Sending action");
        let request = ActionRequest::soap(&state.service_type, action_name, args);
        self.dispatch(&state, request)
    }

    pub fn power_on(&self, devnum: usize) -> Result<()> {
        self.send_action(CONTROL_SERVICE, devnum, "PowerOn", &[])
    }

    pub fn power_off(&self, devnum: usize) -> Result<()> {
        self.send_action(CONTROL_SERVICE, devnum, "PowerOff", &[])
    }

    /// Post a JSON command to the control service of device `devnum`
    pub fn send_command(&self, devnum: usize, command: &ProprietaryCommand) -> Result<()> {
        let (udn, state) = self.registry.service(devnum, CONTROL_SERVICE)?;
        debug!(udn = %udn, command = command.name(), "Sending proprietary command");
        let request = ActionRequest::raw(command.name(), command.to_json().to_string());
        self.dispatch(&state, request)
    }

    pub fn get_ap_list(&self, devnum: usize) -> Result<()> {
        self.send_command(devnum, &ProprietaryCommand::GetApList)
    }

    pub fn connect_to_ap(&self, devnum: usize, access_point: AccessPoint) -> Result<()> {
        self.send_command(devnum, &ProprietaryCommand::ConnectToAp(access_point))
    }

    pub fn close_ap(&self, devnum: usize) -> Result<()> {
        self.send_command(devnum, &ProprietaryCommand::CloseAp)
    }

    pub fn get_product_info(&self, devnum: usize) -> Result<()> {
        self.send_command(devnum, &ProprietaryCommand::GetProductInfo)
    }

    pub fn set_name(&self, devnum: usize, name: &str) -> Result<()> {
        self.send_command(devnum, &ProprietaryCommand::SetName(name.to_string()))
    }

    /// Query `var_name`; the value arrives as [`StateUpdate::GetVarComplete`](crate::StateUpdate)
    pub fn get_var(&self, service: usize, devnum: usize, var_name: &str) -> Result<()> {
        let (_, state) = self.registry.service(devnum, service)?;
        let handler = self.handler.clone();
        self.ops.get_var(
            &state.control_url,
            var_name,
            Box::new(move |event| handler.handle(event)),
        )?;
        Ok(())
    }

    fn dispatch(&self, state: &ServiceState, request: ActionRequest) -> Result<()> {
        let handler = self.handler.clone();
        self.ops.send_action(
            &state.control_url,
            &state.service_type,
            request,
            Box::new(move |event| handler.handle(event)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProprietaryCommand::GetApList, "getAPList", 1)]
    #[case(ProprietaryCommand::CloseAp, "closeAP", 3)]
    #[case(ProprietaryCommand::GetProductInfo, "getProductInfo", 4)]
    fn test_command_header(#[case] command: ProprietaryCommand, #[case] name: &str, #[case] value: u64) {
        let body = command.to_json();
        assert_eq!(body["command"]["commandName"], name);
        assert_eq!(body["command"]["commandValue"], value);
        assert_eq!(body["command"]["commandType"], "proprietary");
        assert_eq!(body["parameters"], json!({}));
    }

    #[test]
    fn test_connect_to_ap_parameters() {
        let command = ProprietaryCommand::ConnectToAp(AccessPoint {
            ssid: "Lab".to_string(),
            password: "secret".to_string(),
            security: 1,
            security_type: "WPA".to_string(),
        });
        assert_eq!(
            command.to_json()["parameters"],
            json!({"password": "secret", "SSID": "Lab", "security": 1, "securityType": "WPA"})
        );
    }

    #[test]
    fn test_set_name_body_round_trips_as_json() {
        let body = ProprietaryCommand::SetName("Bed Room".to_string())
            .to_json()
            .to_string();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["command"]["commandValue"], 5);
        assert_eq!(parsed["parameters"]["name"], "Bed Room");
    }
}
