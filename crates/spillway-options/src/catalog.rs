//! Option sets for catalog integrations.

/// Options for the Hive metastore catalog.
pub mod hive {
    use crate::{ConfigOption, OptionsSchema};

    /// Catalog identifier used to select the Hive catalog.
    pub const IDENTIFIER: &str = "hive";

    /// Directory containing `hive-site.xml`.
    pub const HIVE_CONF_DIR: ConfigOption<String> = ConfigOption::new("hive-conf-dir")
        .with_description(
            "File directory of the hive-site.xml, used to create the metastore client and \
             for security authentication such as Kerberos, LDAP or Ranger.",
        );

    /// Directory containing the Hadoop site files.
    pub const HADOOP_CONF_DIR: ConfigOption<String> = ConfigOption::new("hadoop-conf-dir")
        .with_description(
            "File directory of core-site.xml, hdfs-site.xml, yarn-site.xml and \
             mapred-site.xml. Only local file system paths are supported. Prefer the \
             HADOOP_CONF_DIR environment variable unless each catalog needs its own \
             Hadoop configuration.",
        );

    /// Schema listing every Hive catalog option.
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new("hive catalog")
            .with(&HIVE_CONF_DIR)
            .with(&HADOOP_CONF_DIR)
    }
}
