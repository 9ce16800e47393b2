//! Known attribute names
//!
//! The flat catalog of attribute names the controller understands, used for
//! the inventory fetch. Which of these matter per object type is a policy of
//! the embedding application (supplied as a whitelist on the model).

/// Every attribute name observed in controller responses
pub const ALL_KNOWN_ATTRIBUTES: &[&str] = &[
    "ACT", "ADDRESS", "AVAIL", "BODY", "BOOST", "CHILD", "CIRCUIT", "CITY", "CLK24A", "COUNTRY",
    "DAY", "DLSTIM", "DNTSTP", "EMAIL", "EMAIL2", "FEATR", "GPM", "HEATER", "HEATING", "HITMP",
    "HTMODE", "HTSRC", "LIMIT", "LISTORD", "LOCX", "LOCY", "LOTMP", "LSTTMP", "MANHT", "MANUAL",
    "MIN", "MODE", "NAME", "OBJTYP", "OFFSET", "PARENT", "PASSWRD", "PHONE", "PHONE2", "PROBE",
    "PROPNAME", "PWR", "RLY", "RPM", "SELECT", "SERVICE", "SET", "SHOMNU", "SINGLE", "SNAME",
    "SPEED", "SRIS", "SSET", "START", "STATE", "STATUS", "STOP", "SUBTYP", "SWIM", "SYNC",
    "TEMPNC", "TIME", "TIMOUT", "TIMZON", "USAGE", "USE", "VACFLO", "VACTIM", "VALVE", "VER",
    "VOL", "ZIP",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_includes_type_fields() {
        assert!(ALL_KNOWN_ATTRIBUTES.contains(&"OBJTYP"));
        assert!(ALL_KNOWN_ATTRIBUTES.contains(&"SUBTYP"));
        assert!(ALL_KNOWN_ATTRIBUTES.contains(&"STATUS"));
    }
}
