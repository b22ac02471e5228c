mod command_pipeline;
